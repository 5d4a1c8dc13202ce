//! Confirmation gate for destructive operations
//!
//! A destructive request first yields a single-use token; execution only
//! happens when the same request is resubmitted with that token before it
//! expires. The pending table is the only shared mutable state in the
//! gateway. Every transition takes the table lock once and never holds it
//! across an await.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

use super::operations::Operation;
use super::request::ValidatedRequest;
use crate::error::GatewayError;

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One pending confirmation per (operation, target).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateKey {
    pub operation: Operation,
    pub target: String,
}

impl GateKey {
    pub fn for_request(request: &ValidatedRequest) -> Self {
        Self {
            operation: request.operation,
            target: request.target(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub token: String,
    pub key: GateKey,
    pub request: ValidatedRequest,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn ticket(&self) -> ConfirmationTicket {
        ConfirmationTicket {
            token: self.token.clone(),
            operation: self.key.operation,
            target: self.key.target.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// What the caller receives instead of an execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationTicket {
    pub token: String,
    pub operation: Operation,
    pub target: String,
    pub expires_at: DateTime<Utc>,
}

impl ConfirmationTicket {
    pub fn into_error(self) -> GatewayError {
        GatewayError::ConfirmationRequired {
            operation: self.operation.to_string(),
            target: self.target,
            token: self.token,
            expires_at: self.expires_at,
        }
    }
}

/// Proof that a destructive request passed the gate.
///
/// Only [`ConfirmationGate::confirm`] can produce one.
#[derive(Debug)]
pub struct Confirmed {
    request: ValidatedRequest,
    token: String,
}

impl Confirmed {
    pub fn request(&self) -> &ValidatedRequest {
        &self.request
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Terminal transitions, reported for logging and audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTransition {
    AwaitingConfirmation,
    Confirmed,
    Rejected,
    Expired,
}

#[derive(Debug, Default)]
struct GateTable {
    pending: HashMap<GateKey, PendingConfirmation>,
    tokens: HashMap<String, GateKey>,
    /// Expired tokens and when they expired, kept for the retention window.
    expired: HashMap<String, DateTime<Utc>>,
}

impl GateTable {
    fn remove(&mut self, key: &GateKey) -> Option<PendingConfirmation> {
        let entry = self.pending.remove(key)?;
        self.tokens.remove(&entry.token);
        Some(entry)
    }

    /// Move every overdue entry to the tombstones and drop stale tombstones.
    fn sweep(&mut self, now: DateTime<Utc>, retention: TimeDelta) -> Vec<PendingConfirmation> {
        let overdue: Vec<GateKey> = self
            .pending
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for key in overdue {
            if let Some(entry) = self.remove(&key) {
                self.expired.insert(entry.token.clone(), entry.expires_at);
                expired.push(entry);
            }
        }

        self.expired
            .retain(|_, expired_at| now < *expired_at + retention);
        expired
    }
}

#[derive(Debug)]
pub struct ConfirmationGate {
    ttl: TimeDelta,
    retention: TimeDelta,
    clock: Arc<dyn Clock>,
    table: Mutex<GateTable>,
}

impl ConfirmationGate {
    pub const DEFAULT_TTL_SECS: i64 = 120;

    pub fn new(ttl: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            retention: ttl.checked_mul(10).unwrap_or(ttl),
            clock,
            table: Mutex::new(GateTable::default()),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, GateTable> {
        // A poisoned table is still structurally valid; keep serving.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sweep_locked(&self, table: &mut GateTable) -> usize {
        let expired = table.sweep(self.clock.now(), self.retention);
        for entry in &expired {
            info!(
                operation = %entry.key.operation,
                target = %entry.key.target,
                "Confirmation expired"
            );
        }
        expired.len()
    }

    /// REQUESTED -> AWAITING_CONFIRMATION.
    ///
    /// If the same (operation, target) is already awaiting confirmation the
    /// existing entry is returned unchanged.
    pub fn request(&self, request: ValidatedRequest) -> PendingConfirmation {
        let key = GateKey::for_request(&request);
        let mut table = self.lock();
        self.sweep_locked(&mut table);

        if let Some(existing) = table.pending.get(&key) {
            debug!(
                operation = %key.operation,
                target = %key.target,
                "Returning existing pending confirmation"
            );
            return existing.clone();
        }

        let now = self.clock.now();
        let entry = PendingConfirmation {
            token: uuid::Uuid::new_v4().to_string(),
            key: key.clone(),
            request,
            created_at: now,
            expires_at: now + self.ttl,
        };
        table.tokens.insert(entry.token.clone(), key.clone());
        table.pending.insert(key, entry.clone());

        info!(
            operation = %entry.key.operation,
            target = %entry.key.target,
            expires_at = %entry.expires_at,
            "Awaiting confirmation"
        );
        entry
    }

    /// AWAITING_CONFIRMATION -> CONFIRMED, or REJECTED/EXPIRED on failure.
    ///
    /// The resubmitted request must describe the same action as the pending
    /// one. A wrong token for a pending target rejects that entry.
    pub fn confirm(&self, token: &str, request: &ValidatedRequest) -> Result<Confirmed, GatewayError> {
        let key = GateKey::for_request(request);
        let mut table = self.lock();
        self.sweep_locked(&mut table);

        let pending_token = table.pending.get(&key).map(|entry| entry.token.clone());
        match pending_token {
            Some(expected) if expected == token => {
                let entry = match table.remove(&key) {
                    Some(entry) => entry,
                    None => {
                        return Err(GatewayError::ConfirmationMismatch {
                            reason: "no pending confirmation for this token".to_string(),
                        })
                    }
                };
                if !entry.request.same_action(request) {
                    warn!(operation = %key.operation, target = %key.target, "Confirmation rejected: request changed");
                    return Err(GatewayError::ConfirmationMismatch {
                        reason: "resubmitted request differs from the one awaiting confirmation"
                            .to_string(),
                    });
                }
                info!(operation = %key.operation, target = %key.target, "Confirmed");
                Ok(Confirmed {
                    request: entry.request,
                    token: entry.token,
                })
            }
            Some(_) if table.expired.contains_key(token) => Err(GatewayError::ConfirmationExpired),
            Some(_) => {
                table.remove(&key);
                warn!(operation = %key.operation, target = %key.target, "Confirmation rejected: token mismatch");
                Err(GatewayError::ConfirmationMismatch {
                    reason: "token does not match the pending confirmation; request it again"
                        .to_string(),
                })
            }
            None => {
                if table.expired.contains_key(token) {
                    return Err(GatewayError::ConfirmationExpired);
                }
                if let Some(other) = table.tokens.get(token).cloned() {
                    table.remove(&other);
                    warn!(operation = %other.operation, target = %other.target, "Confirmation rejected: token used for a different request");
                    return Err(GatewayError::ConfirmationMismatch {
                        reason: "token was issued for a different request".to_string(),
                    });
                }
                Err(GatewayError::ConfirmationMismatch {
                    reason: "no pending confirmation for this token".to_string(),
                })
            }
        }
    }

    /// AWAITING_CONFIRMATION -> REJECTED by explicit cancellation.
    pub fn cancel(&self, token: &str) -> Result<PendingConfirmation, GatewayError> {
        let mut table = self.lock();
        self.sweep_locked(&mut table);

        if table.expired.contains_key(token) {
            return Err(GatewayError::ConfirmationExpired);
        }
        let key = table
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| GatewayError::ConfirmationMismatch {
                reason: "no pending confirmation for this token".to_string(),
            })?;
        let entry = table
            .remove(&key)
            .ok_or_else(|| GatewayError::ConfirmationMismatch {
                reason: "no pending confirmation for this token".to_string(),
            })?;
        info!(operation = %key.operation, target = %key.target, "Confirmation cancelled");
        Ok(entry)
    }

    /// Purge expired entries. Returns how many expired in this sweep.
    pub fn sweep(&self) -> usize {
        let mut table = self.lock();
        self.sweep_locked(&mut table)
    }

    pub fn pending_count(&self) -> usize {
        let mut table = self.lock();
        self.sweep_locked(&mut table);
        table.pending.len()
    }

    pub fn pending(&self) -> Vec<PendingConfirmation> {
        let mut table = self.lock();
        self.sweep_locked(&mut table);
        table.pending.values().cloned().collect()
    }

    /// Sweep periodically until the gate is dropped.
    pub fn spawn_sweeper(
        gate: &Arc<ConfirmationGate>,
        period: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let weak: Weak<ConfirmationGate> = Arc::downgrade(gate);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(gate) => {
                        let expired = gate.sweep();
                        if expired > 0 {
                            debug!("Sweeper expired {} confirmations", expired);
                        }
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::request::OperationRequest;
    use crate::engine::validator::validate;

    fn delete_pod(name: &str) -> ValidatedRequest {
        validate(
            &OperationRequest::new("delete_resource")
                .param("kind", "pod")
                .param("name", name),
        )
        .unwrap()
    }

    fn gate() -> (ConfirmationGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = ConfirmationGate::new(TimeDelta::seconds(120), clock.clone());
        (gate, clock)
    }

    #[test]
    fn test_request_then_confirm() {
        let (gate, _) = gate();
        let pending = gate.request(delete_pod("x"));
        assert_eq!(gate.pending_count(), 1);

        let confirmed = gate.confirm(&pending.token, &delete_pod("x")).unwrap();
        assert_eq!(confirmed.request().text("name"), Some("x"));
        assert_eq!(gate.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_request_reuses_entry() {
        let (gate, _) = gate();
        let first = gate.request(delete_pod("x"));
        let second = gate.request(delete_pod("x"));
        assert_eq!(first.token, second.token);
        assert_eq!(first.expires_at, second.expires_at);
        assert_eq!(gate.pending_count(), 1);

        let other = gate.request(delete_pod("y"));
        assert_ne!(first.token, other.token);
        assert_eq!(gate.pending_count(), 2);
    }

    #[test]
    fn test_token_is_single_use() {
        let (gate, _) = gate();
        let pending = gate.request(delete_pod("x"));
        gate.confirm(&pending.token, &delete_pod("x")).unwrap();
        let err = gate.confirm(&pending.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn test_wrong_token_rejects_pending_entry() {
        let (gate, _) = gate();
        let pending = gate.request(delete_pod("x"));
        let err = gate.confirm("not-the-token", &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationMismatch { .. }));
        assert_eq!(gate.pending_count(), 0);

        let err = gate.confirm(&pending.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn test_token_for_other_target_rejected() {
        let (gate, _) = gate();
        let pending = gate.request(delete_pod("x"));
        let err = gate.confirm(&pending.token, &delete_pod("y")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationMismatch { .. }));
        assert_eq!(gate.pending_count(), 0);
    }

    #[test]
    fn test_expiry_boundary() {
        let (gate, clock) = gate();
        let pending = gate.request(delete_pod("x"));
        clock.advance(TimeDelta::seconds(120) - TimeDelta::milliseconds(1));
        assert!(gate.confirm(&pending.token, &delete_pod("x")).is_ok());

        let pending = gate.request(delete_pod("x"));
        clock.advance(TimeDelta::seconds(120) + TimeDelta::milliseconds(1));
        let err = gate.confirm(&pending.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationExpired));
    }

    #[test]
    fn test_expired_token_stays_expired() {
        let (gate, clock) = gate();
        let pending = gate.request(delete_pod("x"));
        clock.advance(TimeDelta::seconds(121));
        assert_eq!(gate.sweep(), 1);
        assert_eq!(gate.pending_count(), 0);

        let err = gate.confirm(&pending.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationExpired));
        let err = gate.cancel(&pending.token).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationExpired));
    }

    #[test]
    fn test_tombstones_are_dropped_after_retention() {
        let (gate, clock) = gate();
        let pending = gate.request(delete_pod("x"));
        clock.advance(TimeDelta::seconds(121));
        gate.sweep();
        clock.advance(TimeDelta::seconds(120 * 10 + 1));
        gate.sweep();

        let err = gate.confirm(&pending.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn test_cancel_rejects() {
        let (gate, _) = gate();
        let pending = gate.request(delete_pod("x"));
        let cancelled = gate.cancel(&pending.token).unwrap();
        assert_eq!(cancelled.key.target, pending.key.target);

        let err = gate.confirm(&pending.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn test_new_token_after_expiry() {
        let (gate, clock) = gate();
        let first = gate.request(delete_pod("x"));
        clock.advance(TimeDelta::seconds(200));
        let second = gate.request(delete_pod("x"));
        assert_ne!(first.token, second.token);

        let err = gate.confirm(&first.token, &delete_pod("x")).unwrap_err();
        assert!(matches!(err, GatewayError::ConfirmationExpired));
        assert!(gate.confirm(&second.token, &delete_pod("x")).is_ok());
    }

    #[test]
    fn test_concurrent_confirms_only_one_wins() {
        let (gate, _) = gate();
        let gate = Arc::new(gate);
        let pending = gate.request(delete_pod("x"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let token = pending.token.clone();
                std::thread::spawn(move || gate.confirm(&token, &delete_pod("x")).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_gate_dropped() {
        let gate = Arc::new(ConfirmationGate::new(
            TimeDelta::seconds(1),
            Arc::new(SystemClock),
        ));
        let handle = ConfirmationGate::spawn_sweeper(&gate, std::time::Duration::from_millis(10));
        drop(gate);
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("sweeper exits")
            .unwrap();
    }
}
