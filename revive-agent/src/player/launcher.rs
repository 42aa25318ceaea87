//! Spawning and signalling renderer processes
//!
//! [`ProcessLauncher`] is the seam between playback logic and the operating
//! system. [`MpvLauncher`] drives a real `mpv`; tests substitute a fake.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::RendererConfig;
use crate::error::{Error, Result};

/// What to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub url: String,
    /// Renderer-level volume; `None` leaves the renderer default
    pub volume: Option<u8>,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = Some(volume.min(100));
        self
    }
}

/// Job-control signals sent to a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Stop,
    Continue,
    Kill,
}

impl ProcessSignal {
    /// Name as understood by `kill -s`
    pub fn name(&self) -> &'static str {
        match self {
            ProcessSignal::Stop => "STOP",
            ProcessSignal::Continue => "CONT",
            ProcessSignal::Kill => "KILL",
        }
    }
}

/// A running renderer
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: u32,
    /// Resolves with the exit code once the process is gone
    pub exited: oneshot::Receiver<Option<i32>>,
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, request: &RenderRequest) -> Result<SpawnedProcess>;

    async fn signal(&self, pid: u32, signal: ProcessSignal) -> Result<()>;

    /// Kill stray renderer processes this agent may have orphaned
    async fn sweep(&self) -> Result<()>;
}

/// Launches `mpv` with audio-only output
pub struct MpvLauncher {
    config: RendererConfig,
}

impl MpvLauncher {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Full argument list for a request, URL last
    pub fn args(&self, request: &RenderRequest) -> Vec<String> {
        let mut args = vec![
            "--no-video".to_string(),
            format!("--audio-device={}", self.config.audio_device),
            "--really-quiet".to_string(),
        ];
        if let Some(volume) = request.volume {
            args.push(format!("--volume={}", volume));
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push(request.url.clone());
        args
    }

    fn process_name(&self) -> &str {
        self.config
            .program
            .rsplit('/')
            .next()
            .unwrap_or(&self.config.program)
    }
}

#[async_trait]
impl ProcessLauncher for MpvLauncher {
    async fn spawn(&self, request: &RenderRequest) -> Result<SpawnedProcess> {
        let mut child = Command::new(&self.config.program)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {}: {}", self.config.program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Process("renderer exited before reporting a pid".to_string()))?;

        let (tx, exited) = oneshot::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, error = %e, "Failed to wait for renderer");
                    None
                }
            };
            let _ = tx.send(code);
        });

        debug!(pid, url = %request.url, "Renderer spawned");
        Ok(SpawnedProcess { pid, exited })
    }

    async fn signal(&self, pid: u32, signal: ProcessSignal) -> Result<()> {
        let status = Command::new("kill")
            .args(["-s", signal.name(), &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Process(format!("failed to run kill: {}", e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Process(format!(
                "kill -s {} {} exited with {}",
                signal.name(),
                pid,
                status
            )))
        }
    }

    async fn sweep(&self) -> Result<()> {
        let status = Command::new("pkill")
            .args(["-9", "-x", self.process_name()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Process(format!("failed to run pkill: {}", e)))?;

        // 1 means nothing matched
        match status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(Error::Process(format!("pkill exited with {}", status))),
        }
    }
}
