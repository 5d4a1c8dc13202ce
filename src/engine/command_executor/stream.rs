//! Streaming execution for long-running operations (`port_forward`,
//! `get_logs` with `follow`).

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "stream", content = "line", rename_all = "snake_case")]
pub enum StreamLine {
    Stdout(String),
    Stderr(String),
}

/// Owner of a running stream. Dropping it kills the subprocess.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<Option<i32>>,
}

impl StreamHandle {
    /// `task` must stop its subprocess when `cancel` fires or is dropped,
    /// and resolve to the exit code if the process ended by itself.
    pub fn new(cancel: oneshot::Sender<()>, task: JoinHandle<Option<i32>>) -> Self {
        Self {
            cancel: Some(cancel),
            task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Kill the subprocess and wait until it has been reaped.
    ///
    /// Returns the exit code when the process had already exited on its own.
    pub async fn cancel(mut self) -> Option<i32> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        (&mut self.task).await.ok().flatten()
    }
}

async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Forward a line unless the stream is cancelled while the consumer is slow.
///
/// Returns `false` when cancellation was requested.
async fn forward(
    tx: &mpsc::Sender<StreamLine>,
    line: StreamLine,
    cancel: &mut oneshot::Receiver<()>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel => false,
        // A closed receiver just means nobody is listening; keep draining.
        _ = tx.send(line) => true,
    }
}

/// Copy child output into `tx` until the child exits or `cancel` resolves.
pub(crate) async fn pump(
    mut child: Child,
    tx: mpsc::Sender<StreamLine>,
    mut cancel: oneshot::Receiver<()>,
) -> Option<i32> {
    let mut stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
    let mut stderr = child.stderr.take().map(|err| BufReader::new(err).lines());

    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!("Stream cancelled; killing subprocess");
                let _ = child.kill().await;
                return None;
            }
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => {
                    if !forward(&tx, StreamLine::Stdout(line), &mut cancel).await {
                        let _ = child.kill().await;
                        return None;
                    }
                }
                None => stdout = None,
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line {
                Some(line) => {
                    if !forward(&tx, StreamLine::Stderr(line), &mut cancel).await {
                        let _ = child.kill().await;
                        return None;
                    }
                }
                None => stderr = None,
            },
            status = child.wait(), if stdout.is_none() && stderr.is_none() => {
                let code = status.ok().and_then(|s| s.code());
                debug!("Streamed process exited with {:?}", code);
                return code;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CommandRunner, Invocation, OutputFormat, ProcessRunner};
    use super::*;
    use crate::engine::operations::Tool;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn sh(script: &str) -> Invocation {
        Invocation {
            tool: Tool::Kubectl,
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
            output: OutputFormat::Text,
        }
    }

    #[tokio::test]
    async fn test_stream_delivers_lines_and_exit_code() {
        let (handle, mut rx) = ProcessRunner::new()
            .stream(&sh("echo one; echo two >&2; exit 3"))
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&StreamLine::Stdout("one".to_string())));
        assert!(lines.contains(&StreamLine::Stderr("two".to_string())));
        assert_eq!(handle.cancel().await, Some(3));
    }

    #[tokio::test]
    async fn test_cancel_kills_long_running_process() {
        let (handle, mut rx) = ProcessRunner::new()
            .stream(&sh("echo ready; sleep 30"))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(StreamLine::Stdout("ready".to_string()))
        );

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.cancel())
            .await
            .expect("cancel returns promptly");
        assert_eq!(exit, None);
    }
}
