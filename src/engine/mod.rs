//! The kubegate engine - core orchestration module
//!
//! A request flows through five stages:
//! - Argument validation ([`validator`])
//! - Risk classification ([`risk`])
//! - Confirmation gating for destructive operations ([`confirmation`])
//! - Shell-free execution of kubectl/helm/gcloud ([`command_executor`])
//! - Result normalization ([`normalizer`])
//!
//! [`Gateway`] owns the per-process state (pending confirmations, running
//! streams) and is the single entry point.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub mod audit;
pub mod command_executor;
pub mod confirmation;
pub mod normalizer;
pub mod operations;
pub mod request;
pub mod response;
pub mod risk;
pub mod validator;

use audit::{AuditEvent, AuditRecord, AuditSinkImpl};
use command_executor::{
    CommandRunner, ContextCheck, DryRun, ExecutionError, ExecutionMode, Invocation, InvocationBuilder,
    InvocationPlan, PlannedOperation, ProcessRunner, StreamHandle, StreamLine,
};
use confirmation::{Clock, ConfirmationGate, ConfirmationTicket, Confirmed, PendingConfirmation, SystemClock};
use normalizer::{normalize, ErrorDetail, ExecutionSummary, NormalizedResult};
use operations::{Operation, Scope, Tool};
use request::{OperationRequest, ValidatedRequest};
use response::Response;
use risk::{RiskClassifier, RiskLevel};

use crate::config::{kubeconfig, GatewayConfig};
use crate::error::{ErrorKind, GatewayError};
use crate::KubegateError;

/// Timeout for `doctor` version probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A mutating operation previewed instead of applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub result: NormalizedResult,
    pub commands: Vec<String>,
    pub dry_run: DryRun,
}

/// A running long-lived operation. Output arrives on `lines`; the
/// subprocess is owned by the gateway until cancelled by id.
#[derive(Debug)]
pub struct StreamSession {
    pub id: Uuid,
    pub operation: Operation,
    pub command: Vec<String>,
    pub lines: mpsc::Receiver<StreamLine>,
}

#[derive(Debug)]
pub enum Outcome {
    Completed(NormalizedResult),
    Preview(Preview),
    ConfirmationRequired(ConfirmationTicket),
    Stream(StreamSession),
}

impl Outcome {
    /// The normalized result, for completed runs and previews.
    ///
    /// A pending confirmation becomes `ConfirmationRequired`.
    pub fn into_result(self) -> Result<NormalizedResult, GatewayError> {
        match self {
            Outcome::Completed(result) => Ok(result),
            Outcome::Preview(preview) => Ok(preview.result),
            Outcome::ConfirmationRequired(ticket) => Err(ticket.into_error()),
            Outcome::Stream(session) => Ok(NormalizedResult::plan_only(
                session.operation,
                json!({ "streamId": session.id.to_string() }),
            )),
        }
    }
}

/// What `plan` reports without executing anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub operation: Operation,
    pub risk: RiskLevel,
    pub target: String,
    pub requires_confirmation: bool,
    pub preview: bool,
    pub dry_run: DryRun,
    pub mode: ExecutionMode,
    pub timeout_secs: u64,
    pub commands: Vec<String>,
    pub steps: Vec<Invocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: Tool,
    pub program: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Authorization to execute. Destructive requests can only be cleared by a
/// [`Confirmed`] proof from the gate.
enum Clearance {
    Unrestricted(ValidatedRequest),
    Confirmed(Confirmed),
}

impl Clearance {
    fn request(&self) -> &ValidatedRequest {
        match self {
            Clearance::Unrestricted(request) => request,
            Clearance::Confirmed(confirmed) => confirmed.request(),
        }
    }
}

/// Running streams keyed by id.
#[derive(Debug, Default)]
struct StreamRegistry {
    streams: Mutex<HashMap<Uuid, (Operation, StreamHandle)>>,
}

impl StreamRegistry {
    fn insert(&self, id: Uuid, operation: Operation, handle: StreamHandle) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.retain(|_, (_, handle)| !handle.is_finished());
        streams.insert(id, (operation, handle));
    }

    fn remove(&self, id: &Uuid) -> Option<(Operation, StreamHandle)> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    fn drain(&self) -> Vec<(Uuid, Operation, StreamHandle)> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(id, (operation, handle))| (id, operation, handle))
            .collect()
    }

    fn active(&self) -> usize {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.retain(|_, (_, handle)| !handle.is_finished());
        streams.len()
    }
}

/// The command execution gateway
pub struct Gateway {
    config: GatewayConfig,
    classifier: RiskClassifier,
    gate: Arc<ConfirmationGate>,
    builder: InvocationBuilder,
    runner: Arc<dyn CommandRunner>,
    streams: StreamRegistry,
    audit: AuditSinkImpl,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("pending", &self.gate.pending_count())
            .field("streams", &self.streams.active())
            .finish()
    }
}

impl Gateway {
    /// Gateway running real subprocesses on the system clock
    pub fn new(config: GatewayConfig) -> crate::Result<Self> {
        Self::with_runner(config, Arc::new(ProcessRunner::new()), Arc::new(SystemClock))
    }

    pub fn with_runner(
        config: GatewayConfig,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> crate::Result<Self> {
        let classifier = RiskClassifier::with_overrides(config.risk_overrides.clone())
            .map_err(KubegateError::Config)?;
        let gate = Arc::new(ConfirmationGate::new(config.confirmation_ttl(), clock));
        let builder = InvocationBuilder::new(config.tools.clone(), config.kubeconfig.clone());
        let audit = AuditSinkImpl::from_path(config.audit_log.clone());

        info!(
            ttl_secs = config.confirmation_ttl_secs,
            overrides = config.risk_overrides.len(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            classifier,
            gate,
            builder,
            runner,
            streams: StreamRegistry::default(),
            audit,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<ConfirmationGate> {
        &self.gate
    }

    pub fn classify(&self, operation: Operation) -> RiskLevel {
        self.classifier.classify(operation)
    }

    /// Sweep expired confirmations in the background.
    pub fn spawn_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        ConfirmationGate::spawn_sweeper(&self.gate, period)
    }

    /// Validate, classify and build a request without executing it.
    pub fn plan(&self, request: &OperationRequest) -> Result<PlanReport, GatewayError> {
        let validated = validator::validate(request)?;
        let risk = self.classify(validated.operation);
        let preview = risk == RiskLevel::Mutating && !validated.apply;
        let PlannedOperation { plan, dry_run } = self.builder.plan(&validated, preview);

        Ok(PlanReport {
            operation: validated.operation,
            risk,
            target: validated.target(),
            requires_confirmation: risk == RiskLevel::Destructive,
            preview,
            dry_run,
            mode: plan.mode,
            timeout_secs: self.config.timeout_for(validated.operation, risk).as_secs(),
            commands: plan.command_lines(),
            steps: plan.steps,
        })
    }

    /// Run a request through the full pipeline.
    #[instrument(skip(self, request), fields(operation = %request.operation))]
    pub async fn invoke(&self, request: OperationRequest) -> Result<Outcome, GatewayError> {
        let validated = match validator::validate(&request) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Request rejected: {}", e);
                self.audit
                    .record(AuditRecord::new(AuditEvent::Rejected, request.operation.clone()).error(e.kind()))
                    .await;
                return Err(e);
            }
        };

        let operation = validated.operation;
        let risk = self.classify(operation);
        let validated = if risk == RiskLevel::Destructive {
            self.pin_current_context(validated).await
        } else {
            validated
        };
        let target = validated.target();
        debug!(%risk, %target, "Request validated");

        let outcome = self
            .dispatch(validated, risk, request.confirmation_token.as_deref())
            .await;
        self.audit_outcome(operation, risk, &target, &outcome).await;
        outcome
    }

    /// Name the kubeconfig's current context explicitly, so a request
    /// without a context and one naming the current context share a
    /// confirmation key and run against the context that was confirmed.
    async fn pin_current_context(&self, mut request: ValidatedRequest) -> ValidatedRequest {
        if request.context.is_some() || request.operation.scope() == Scope::Local {
            return request;
        }
        if let Some(context) = kubeconfig::current_context(self.config.kubeconfig.as_deref()).await {
            match validator::pin_context(&mut request, context) {
                Ok(()) => debug!(context = ?request.context, "Pinned current context"),
                Err(e) => warn!("Not pinning current context: {}", e),
            }
        }
        request
    }

    async fn dispatch(
        &self,
        validated: ValidatedRequest,
        risk: RiskLevel,
        token: Option<&str>,
    ) -> Result<Outcome, GatewayError> {
        match risk {
            RiskLevel::ReadOnly => self.execute(Clearance::Unrestricted(validated), risk).await,
            RiskLevel::Mutating if validated.apply => {
                self.execute(Clearance::Unrestricted(validated), risk).await
            }
            RiskLevel::Mutating => self.preview(validated, risk).await,
            RiskLevel::Destructive => match token {
                None => {
                    let pending = self.gate.request(validated);
                    Ok(Outcome::ConfirmationRequired(pending.ticket()))
                }
                Some(token) => {
                    let confirmed = self.gate.confirm(token, &validated)?;
                    self.execute(Clearance::Confirmed(confirmed), risk).await
                }
            },
        }
    }

    async fn execute(&self, clearance: Clearance, risk: RiskLevel) -> Result<Outcome, GatewayError> {
        let request = clearance.request();
        let planned = self.builder.plan(request, false);

        match planned.plan.mode {
            ExecutionMode::Bounded => {
                let result = self.run_plan(request, risk, &planned.plan).await?;
                Ok(Outcome::Completed(result))
            }
            ExecutionMode::Streaming => self.start_stream(request, &planned.plan).await,
        }
    }

    async fn preview(&self, request: ValidatedRequest, risk: RiskLevel) -> Result<Outcome, GatewayError> {
        let planned = self.builder.plan(&request, true);
        let commands = planned.plan.command_lines();

        let mut result = match planned.dry_run {
            DryRun::Native => self.run_plan(&request, risk, &planned.plan).await?,
            DryRun::Unsupported | DryRun::NotApplicable => NormalizedResult::plan_only(
                request.operation,
                json!({ "commands": commands.clone(), "dryRun": "unsupported" }),
            ),
        };
        result
            .next_steps
            .push("Resubmit the same request with apply=true to apply it".to_string());

        Ok(Outcome::Preview(Preview {
            result,
            commands,
            dry_run: planned.dry_run,
        }))
    }

    /// Run every step in order; the first failing step ends the plan.
    async fn run_plan(
        &self,
        request: &ValidatedRequest,
        risk: RiskLevel,
        plan: &InvocationPlan,
    ) -> Result<NormalizedResult, GatewayError> {
        let operation = request.operation;
        let timeout = self.config.timeout_for(operation, risk);

        if let Some(check) = &plan.skip_if_context {
            if let Some(result) = self.existing_context(operation, check, timeout).await {
                return Ok(result);
            }
        }

        let mut results: Vec<NormalizedResult> = Vec::with_capacity(plan.steps.len());
        for invocation in &plan.steps {
            let result = self
                .runner
                .run(invocation, timeout)
                .await
                .map_err(|e| execution_error(operation, invocation, e))?;
            let normalized = normalize(operation, invocation, &result);

            if !result.success {
                let warnings = results.into_iter().flat_map(|r| r.warnings).collect();
                let normalized = normalized.with_leading_warnings(warnings);
                if normalizer::is_auth_failure(&result.stderr) {
                    let reason = normalized
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "authentication failed".to_string());
                    return Err(GatewayError::ToolUnavailable {
                        tool: invocation.tool.to_string(),
                        reason,
                        diagnostics: Some(Box::new(normalized)),
                    });
                }
                info!(exit_code = result.exit_code, "Command failed");
                return Err(GatewayError::ExecutionFailed {
                    result: Box::new(normalized),
                });
            }
            results.push(normalized);
        }

        Ok(normalizer::combine(operation, results))
    }

    /// A completed result if `check` finds its context already configured.
    /// A failing check only means the steps must run.
    async fn existing_context(
        &self,
        operation: Operation,
        check: &ContextCheck,
        timeout: Duration,
    ) -> Option<NormalizedResult> {
        match self.runner.run(&check.invocation, timeout).await {
            Ok(result) if result.success && check.is_listed(&result.stdout) => {
                info!(context = %check.context, "Context already configured");
                let mut normalized = NormalizedResult::plan_only(
                    operation,
                    json!({
                        "message": format!("Already logged in to {}", check.context),
                        "context": check.context,
                    }),
                );
                normalized.execution = Some(ExecutionSummary {
                    exit_code: result.exit_code,
                    duration_ms: result.duration.as_millis() as u64,
                    command: check.invocation.argv(),
                });
                Some(normalized)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Context check failed: {}", e);
                None
            }
        }
    }

    async fn start_stream(
        &self,
        request: &ValidatedRequest,
        plan: &InvocationPlan,
    ) -> Result<Outcome, GatewayError> {
        let invocation = plan.primary().ok_or_else(|| GatewayError::UnsupportedOperation {
            name: request.operation.to_string(),
        })?;
        let (handle, lines) = self
            .runner
            .stream(invocation)
            .await
            .map_err(|e| execution_error(request.operation, invocation, e))?;

        let id = Uuid::new_v4();
        self.streams.insert(id, request.operation, handle);
        info!(stream_id = %id, "Stream started");

        Ok(Outcome::Stream(StreamSession {
            id,
            operation: request.operation,
            command: invocation.argv(),
            lines,
        }))
    }

    /// Fold any outcome or error into a response object.
    pub async fn handle(&self, request: OperationRequest) -> Response {
        let operation = request.operation.clone();
        match self.invoke(request).await {
            Ok(outcome) => Response::from_outcome(&outcome),
            Err(e) => Response::from_error(operation, &e),
        }
    }

    /// AWAITING_CONFIRMATION -> REJECTED at the caller's request.
    pub async fn cancel_confirmation(&self, token: &str) -> Result<PendingConfirmation, GatewayError> {
        let pending = self.gate.cancel(token)?;
        self.audit
            .record(
                AuditRecord::new(AuditEvent::ConfirmationCancelled, pending.key.operation.name())
                    .risk(self.classify(pending.key.operation))
                    .target(pending.key.target.clone()),
            )
            .await;
        Ok(pending)
    }

    /// Kill a running stream. Returns `None` if no such stream is running.
    pub async fn cancel_stream(&self, id: Uuid) -> Option<(Operation, Option<i32>)> {
        let (operation, handle) = self.streams.remove(&id)?;
        let exit_code = handle.cancel().await;
        info!(stream_id = %id, "Stream cancelled");
        self.audit
            .record(AuditRecord::new(AuditEvent::StreamCancelled, operation.name()))
            .await;
        Some((operation, exit_code))
    }

    /// Kill every running stream.
    pub async fn shutdown(&self) {
        for (id, operation, handle) in self.streams.drain() {
            debug!(stream_id = %id, %operation, "Stopping stream");
            handle.cancel().await;
        }
    }

    pub fn active_streams(&self) -> usize {
        self.streams.active()
    }

    /// Check which external tools are installed and runnable.
    pub async fn probe_tools(&self) -> Vec<ToolStatus> {
        let mut statuses = Vec::with_capacity(Tool::ALL.len());
        for tool in Tool::ALL {
            let invocation = self.builder.probe(tool);
            let status = match self.runner.run(&invocation, PROBE_TIMEOUT).await {
                Ok(result) if result.success => ToolStatus {
                    tool,
                    program: invocation.program.clone(),
                    available: true,
                    version: result
                        .stdout
                        .lines()
                        .map(str::trim)
                        .find(|line| !line.is_empty())
                        .map(str::to_string),
                    error: None,
                },
                Ok(result) => ToolStatus {
                    tool,
                    program: invocation.program.clone(),
                    available: false,
                    version: None,
                    error: Some(format!(
                        "exited with code {}: {}",
                        result.exit_code,
                        result.stderr.trim()
                    )),
                },
                Err(e) => ToolStatus {
                    tool,
                    program: invocation.program.clone(),
                    available: false,
                    version: None,
                    error: Some(e.to_string()),
                },
            };
            debug!(tool = %tool, available = status.available, "Probed tool");
            statuses.push(status);
        }
        statuses
    }

    async fn audit_outcome(
        &self,
        operation: Operation,
        risk: RiskLevel,
        target: &str,
        outcome: &Result<Outcome, GatewayError>,
    ) {
        let record = |event| {
            AuditRecord::new(event, operation.name())
                .risk(risk)
                .target(target)
        };
        let with_execution = |record: AuditRecord, execution: &Option<ExecutionSummary>| match execution {
            Some(e) => record
                .execution(e.exit_code, e.duration_ms)
                .command(shell_words::join(&e.command)),
            None => record,
        };

        let entry = match outcome {
            Ok(Outcome::Completed(result)) => {
                with_execution(record(AuditEvent::Executed), &result.execution)
            }
            Ok(Outcome::Preview(preview)) => {
                with_execution(record(AuditEvent::Previewed), &preview.result.execution)
            }
            Ok(Outcome::ConfirmationRequired(_)) => record(AuditEvent::ConfirmationIssued),
            Ok(Outcome::Stream(session)) => {
                record(AuditEvent::StreamStarted).command(shell_words::join(&session.command))
            }
            Err(e) => match e {
                GatewayError::ConfirmationMismatch { .. } | GatewayError::ConfirmationExpired => {
                    record(AuditEvent::Rejected).error(e.kind())
                }
                _ => match e.result() {
                    Some(result) => with_execution(
                        record(AuditEvent::Failed).error(e.kind()),
                        &result.execution,
                    ),
                    None => record(AuditEvent::Failed).error(e.kind()),
                },
            },
        };
        self.audit.record(entry).await;
    }
}

fn execution_error(operation: Operation, invocation: &Invocation, err: ExecutionError) -> GatewayError {
    match err {
        ExecutionError::ToolUnavailable { program } => GatewayError::ToolUnavailable {
            tool: invocation.tool.to_string(),
            reason: format!("{} not found on PATH", program),
            diagnostics: None,
        },
        ExecutionError::Spawn(reason) => GatewayError::ToolUnavailable {
            tool: invocation.tool.to_string(),
            reason,
            diagnostics: None,
        },
        ExecutionError::Timeout { after } => {
            warn!(%operation, "Timed out after {:?}", after);
            GatewayError::Timeout {
                operation: operation.to_string(),
                after,
            }
        }
        ExecutionError::Io(e) => GatewayError::ExecutionFailed {
            result: Box::new(NormalizedResult {
                operation: operation.to_string(),
                success: false,
                data: Value::Null,
                error: Some(ErrorDetail {
                    kind: ErrorKind::ExecutionFailed,
                    message: format!("I/O error while running {}: {}", invocation.program, e),
                    field: None,
                    stderr: None,
                }),
                warnings: Vec::new(),
                next_steps: Vec::new(),
                execution: None,
            }),
        },
    }
}
