//! The primary renderer slot
//!
//! Holds at most one renderer process. Starts run to completion inside the
//! owner's task; lifecycle is reported asynchronously through
//! [`PlayerEvent`]s tagged with the spawn generation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::events::PlayerEvent;
use super::launcher::{ProcessLauncher, ProcessSignal, RenderRequest};

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Spawned; Started or Exited follows
    Spawned { generation: u64 },
    /// Spawn failed; a Failed event follows
    SpawnFailed { generation: u64 },
    /// Another start is still being verified
    Busy,
    EmptyUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendOutcome {
    Suspended,
    /// STOP failed and the process was killed instead
    Terminated,
    NoProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Continued,
    /// CONT failed; the process was killed and must be restarted
    Failed,
    NoProcess,
}

#[derive(Debug)]
struct Running {
    pid: u32,
    url: String,
    generation: u64,
    suspended: bool,
}

pub struct PlayerProcess {
    launcher: Arc<dyn ProcessLauncher>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    verify_delay: Duration,
    settle_delay: Duration,
    current: Option<Running>,
    /// Set from spawn until Started/Exited/Failed of the same generation
    starting: bool,
    generation: u64,
}

impl PlayerProcess {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        events: mpsc::UnboundedSender<PlayerEvent>,
        verify_delay: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            launcher,
            events,
            verify_delay,
            settle_delay,
            current: None,
            starting: false,
            generation: 0,
        }
    }

    pub fn has_process(&self) -> bool {
        self.current.is_some()
    }

    /// Kill any existing process and spawn one for `url`
    pub async fn start(&mut self, url: &str) -> StartOutcome {
        if self.starting {
            warn!(url, "Start already in progress, ignoring");
            return StartOutcome::Busy;
        }
        if url.trim().is_empty() {
            warn!("Refusing to start renderer with empty URL");
            return StartOutcome::EmptyUrl;
        }

        self.starting = true;

        if let Some(previous) = self.current.take() {
            let switching = previous.url != url;
            self.kill(&previous).await;
            if switching {
                if let Err(e) = self.launcher.sweep().await {
                    debug!(error = %e, "Stray renderer sweep failed");
                }
            }
            tokio::time::sleep(self.settle_delay).await;
        }

        self.generation += 1;
        let generation = self.generation;

        match self.launcher.spawn(&RenderRequest::new(url)).await {
            Ok(spawned) => {
                info!(pid = spawned.pid, url, generation, "Renderer launched");
                self.current = Some(Running {
                    pid: spawned.pid,
                    url: url.to_string(),
                    generation,
                    suspended: false,
                });
                tokio::spawn(supervise(
                    generation,
                    spawned.pid,
                    url.to_string(),
                    spawned.exited,
                    self.verify_delay,
                    self.events.clone(),
                ));
                StartOutcome::Spawned { generation }
            }
            Err(e) => {
                let _ = self.events.send(PlayerEvent::Failed {
                    generation,
                    url: url.to_string(),
                    error: e.to_string(),
                });
                StartOutcome::SpawnFailed { generation }
            }
        }
    }

    /// Fold a lifecycle event into local state
    ///
    /// Returns `false` for events from a superseded generation, which the
    /// caller must ignore.
    pub fn on_event(&mut self, event: &PlayerEvent) -> bool {
        if event.generation() != self.generation {
            return false;
        }
        match event {
            PlayerEvent::Started { .. } => {
                if self.current.is_none() {
                    return false;
                }
                self.starting = false;
            }
            PlayerEvent::Exited { .. } => {
                if self.current.is_none() {
                    return false;
                }
                self.current = None;
                self.starting = false;
            }
            PlayerEvent::Failed { .. } => {
                self.starting = false;
            }
        }
        true
    }

    /// Stop-signal the process, killing it if the signal fails
    pub async fn suspend(&mut self) -> SuspendOutcome {
        let Some(running) = self.current.as_mut() else {
            return SuspendOutcome::NoProcess;
        };
        if running.suspended {
            return SuspendOutcome::Suspended;
        }

        match self.launcher.signal(running.pid, ProcessSignal::Stop).await {
            Ok(()) => {
                running.suspended = true;
                debug!(pid = running.pid, "Renderer suspended");
                SuspendOutcome::Suspended
            }
            Err(e) => {
                warn!(pid = running.pid, error = %e, "Suspend failed, terminating renderer");
                self.terminate().await;
                SuspendOutcome::Terminated
            }
        }
    }

    /// Continue-signal a suspended process
    pub async fn resume(&mut self) -> ResumeOutcome {
        let Some(running) = self.current.as_mut() else {
            return ResumeOutcome::NoProcess;
        };

        match self.launcher.signal(running.pid, ProcessSignal::Continue).await {
            Ok(()) => {
                running.suspended = false;
                debug!(pid = running.pid, "Renderer resumed");
                ResumeOutcome::Continued
            }
            Err(e) => {
                warn!(pid = running.pid, error = %e, "Resume failed, terminating renderer");
                self.terminate().await;
                ResumeOutcome::Failed
            }
        }
    }

    /// Kill and forget the current process
    pub async fn terminate(&mut self) {
        if let Some(running) = self.current.take() {
            self.kill(&running).await;
        }
        self.starting = false;
    }

    async fn kill(&self, running: &Running) {
        match self.launcher.signal(running.pid, ProcessSignal::Kill).await {
            Ok(()) => debug!(pid = running.pid, generation = running.generation, "Renderer killed"),
            Err(e) => warn!(pid = running.pid, error = %e, "Failed to kill renderer"),
        }
    }
}

/// Report Started once the process survives `verify_delay`, then Exited
async fn supervise(
    generation: u64,
    pid: u32,
    url: String,
    mut exited: oneshot::Receiver<Option<i32>>,
    verify_delay: Duration,
    events: mpsc::UnboundedSender<PlayerEvent>,
) {
    tokio::select! {
        code = &mut exited => {
            let _ = events.send(PlayerEvent::Exited { generation, url, code: code.unwrap_or(None) });
            return;
        }
        _ = tokio::time::sleep(verify_delay) => {
            let _ = events.send(PlayerEvent::Started { generation, pid, url: url.clone() });
        }
    }

    let code = exited.await.unwrap_or(None);
    let _ = events.send(PlayerEvent::Exited { generation, url, code });
}
