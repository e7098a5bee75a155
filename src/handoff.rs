//! Delivering a finished profile to an external viewer.
//!
//! The viewer is probed with `{"name":"is-ready"}` until it answers in kind,
//! then receives `{"name":"inject-profile","profile":...}` exactly once.
//! Probing gives up after the configured timeout or when cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use std::process::{ExitStatus, Stdio};

use crate::{HandoffConfig, TaskprofError, TaskprofResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum ViewerMessage<'a> {
    IsReady,
    InjectProfile { profile: &'a serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum ViewerReply {
    IsReady,
    #[serde(other)]
    Other,
}

/// Outbound half of a viewer connection.
#[async_trait]
pub trait ViewerSink: Send {
    async fn send(&mut self, message: &ViewerMessage<'_>) -> TaskprofResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandoffReport {
    pub probes: usize,
}

pub async fn deliver_profile<S: ViewerSink + ?Sized>(
    sink: &mut S,
    replies: &mut mpsc::Receiver<ViewerReply>,
    profile: &serde_json::Value,
    options: &HandoffConfig,
    cancel: &mut watch::Receiver<bool>,
) -> TaskprofResult<HandoffReport> {
    if *cancel.borrow_and_update() {
        return Err(TaskprofError::Cancelled);
    }

    let period = options.probe_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep(options.timeout());
    tokio::pin!(deadline);

    let mut probes = 0usize;
    let mut replies_open = true;
    let mut cancel_open = true;

    loop {
        tokio::select! {
            biased;

            changed = cancel.changed(), if cancel_open => match changed {
                Ok(()) if *cancel.borrow_and_update() => return Err(TaskprofError::Cancelled),
                Ok(()) => {}
                Err(_) => cancel_open = false,
            },
            reply = replies.recv(), if replies_open => match reply {
                Some(ViewerReply::IsReady) => {
                    sink.send(&ViewerMessage::InjectProfile { profile }).await?;
                    tracing::info!(probes, "viewer ready, profile delivered");
                    return Ok(HandoffReport { probes });
                }
                Some(ViewerReply::Other) => tracing::debug!("ignoring unrelated viewer message"),
                None => {
                    tracing::debug!("viewer reply channel closed");
                    replies_open = false;
                }
            },
            _ = &mut deadline => {
                return Err(TaskprofError::Handoff(format!(
                    "viewer not ready after {} ms ({probes} probes)",
                    options.timeout_ms
                )));
            }
            _ = ticker.tick() => {
                probes += 1;
                if let Err(err) = sink.send(&ViewerMessage::IsReady).await {
                    tracing::debug!(probes, "probe not delivered: {err}");
                }
            }
        }
    }
}

/// A viewer running as a child process that speaks JSON lines over stdio.
pub struct ProcessViewer {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ProcessViewer {
    pub fn spawn(program: &str, args: &[String]) -> TaskprofResult<(Self, mpsc::Receiver<ViewerReply>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskprofError::Handoff("viewer stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<ViewerReply>(&line) {
                    Ok(reply) => {
                        if tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::debug!("unparsed viewer output {line:?}: {err}"),
                }
            }
        });

        Ok((Self { child, stdin }, rx))
    }

    /// Closes the viewer's stdin and waits for it to exit.
    pub async fn wait(mut self) -> TaskprofResult<ExitStatus> {
        drop(self.stdin.take());
        Ok(self.child.wait().await?)
    }
}

#[async_trait]
impl ViewerSink for ProcessViewer {
    async fn send(&mut self, message: &ViewerMessage<'_>) -> TaskprofResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TaskprofError::Handoff("viewer stdin closed".to_string()))?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }
}
