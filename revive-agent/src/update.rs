//! Administrative update and restart jobs
//!
//! Each job is an ordered list of external programs taken from
//! configuration. Progress is written to the store before and after every
//! step so operators can follow along; a reboot step may never report back.

use std::process::Stdio;
use std::sync::Arc;

use revive_common::models::{Progress, ProgressStatus, UpdateKind};
use revive_common::store::ProgressSink;
use revive_common::time::now;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::UpdateConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateJob {
    System,
    Full,
    Restart,
}

impl UpdateJob {
    /// Progress record key
    pub fn action(&self) -> &'static str {
        match self {
            UpdateJob::System => "update_system",
            UpdateJob::Full => "full_update",
            UpdateJob::Restart => "restart_device",
        }
    }
}

impl From<UpdateKind> for UpdateJob {
    fn from(kind: UpdateKind) -> Self {
        match kind {
            UpdateKind::System => UpdateJob::System,
            UpdateKind::Full => UpdateJob::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStep {
    pub name: &'static str,
    pub argv: Vec<String>,
}

pub struct UpdateRunner {
    device_id: String,
    sink: Arc<dyn ProgressSink>,
    config: UpdateConfig,
}

impl UpdateRunner {
    pub fn new(device_id: impl Into<String>, sink: Arc<dyn ProgressSink>, config: UpdateConfig) -> Self {
        Self {
            device_id: device_id.into(),
            sink,
            config,
        }
    }

    pub fn steps(&self, job: UpdateJob) -> Vec<UpdateStep> {
        let step = |name, argv: &Vec<String>| UpdateStep {
            name,
            argv: argv.clone(),
        };
        match job {
            UpdateJob::System => vec![step("Upgrading system packages", &self.config.system_upgrade)],
            UpdateJob::Full => vec![
                step("Upgrading system packages", &self.config.system_upgrade),
                step("Syncing agent source", &self.config.source_sync),
                step("Rebooting", &self.config.reboot),
            ],
            UpdateJob::Restart => vec![step("Rebooting", &self.config.reboot)],
        }
    }

    /// Run `job` in the background
    pub fn spawn(self: &Arc<Self>, job: UpdateJob) -> JoinHandle<Result<()>> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run(job).await })
    }

    pub async fn run(&self, job: UpdateJob) -> Result<()> {
        let steps = self.steps(job);
        let started_at = now();
        let total = steps.len().max(1);

        info!(action = job.action(), steps = steps.len(), "Update job starting");
        self.report(job, 0, ProgressStatus::Starting, "Preparing", started_at)
            .await;

        for (i, step) in steps.iter().enumerate() {
            let before = percent(i, total);
            self.report(job, before, ProgressStatus::Running, step.name, started_at)
                .await;

            if let Err(e) = run_step(step).await {
                error!(action = job.action(), step = step.name, error = %e, "Update step failed");
                let message = format!("{} failed: {}", step.name, e);
                self.report(job, before, ProgressStatus::Failed, &message, started_at)
                    .await;
                return Err(e);
            }
            info!(action = job.action(), step = step.name, "Update step complete");
        }

        self.report(job, 100, ProgressStatus::Completed, "Completed", started_at)
            .await;
        info!(action = job.action(), "Update job complete");
        Ok(())
    }

    async fn report(
        &self,
        job: UpdateJob,
        progress: u8,
        status: ProgressStatus,
        step: &str,
        started_at: chrono::DateTime<chrono::Utc>,
    ) {
        let record = Progress {
            action: job.action().to_string(),
            progress,
            status,
            current_step: step.to_string(),
            started_at,
            updated_at: now(),
        };
        if let Err(e) = self.sink.write_progress(&self.device_id, &record).await {
            warn!(action = job.action(), error = %e, "Failed to write progress");
        }
    }
}

fn percent(done: usize, total: usize) -> u8 {
    ((done * 100) / total).min(100) as u8
}

async fn run_step(step: &UpdateStep) -> Result<()> {
    let (program, args) = step.argv.split_first().ok_or_else(|| Error::UpdateStep {
        step: step.name.to_string(),
        reason: "no command configured".to_string(),
    })?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::UpdateStep {
            step: step.name.to_string(),
            reason: format!("failed to run {}: {}", program, e),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: String = stderr
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join(" | ");
    Err(Error::UpdateStep {
        step: step.name.to_string(),
        reason: format!("{} exited with {}: {}", program, output.status, tail),
    })
}
