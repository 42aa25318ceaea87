//! Auto-play at boot
//!
//! Right after power-on the sound card, network, or store may not be ready.
//! The bootstrapper waits, then resolves device → group → target and starts
//! playback, retrying with linear backoff. Giving up is logged, never fatal:
//! the config watcher and remote commands can still start playback later.

use std::sync::Arc;
use std::time::Duration;

use revive_common::models::PlaybackTarget;
use revive_common::store::ConfigSource;
use revive_common::time::linear_backoff;
use tracing::{error, info, warn};

use crate::audio::AudioMixerControl;
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::playback::PlaybackHandle;

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub initial_delay: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl From<&BootstrapConfig> for BootstrapSettings {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Started(PlaybackTarget),
    /// Something else already started playback
    AlreadyActive,
}

pub struct AutoPlayBootstrapper {
    device_id: String,
    store: Arc<dyn ConfigSource>,
    mixer: Arc<AudioMixerControl>,
    playback: PlaybackHandle,
    settings: BootstrapSettings,
}

impl AutoPlayBootstrapper {
    pub fn new(
        device_id: impl Into<String>,
        store: Arc<dyn ConfigSource>,
        mixer: Arc<AudioMixerControl>,
        playback: PlaybackHandle,
        settings: BootstrapSettings,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            store,
            mixer,
            playback,
            settings,
        }
    }

    pub async fn run(self) -> Result<BootstrapOutcome> {
        tokio::time::sleep(self.settings.initial_delay).await;

        let max_attempts = self.settings.max_attempts;
        for attempt in 1..=max_attempts {
            match self.attempt().await {
                Ok(outcome) => {
                    info!(attempt, ?outcome, "Auto-play complete");
                    return Ok(outcome);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = linear_backoff(attempt, self.settings.base_delay, self.settings.max_delay);
                    warn!(attempt, max_attempts, error = %e, retry_in = ?delay, "Auto-play attempt failed");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempts = max_attempts, error = %e, "Auto-play gave up");
                    return Err(e);
                }
            }
        }

        Err(Error::Bootstrap("no attempts configured".to_string()))
    }

    async fn attempt(&self) -> Result<BootstrapOutcome> {
        if self.playback.snapshot().phase.is_active() {
            return Ok(BootstrapOutcome::AlreadyActive);
        }

        self.mixer
            .probe()
            .await
            .map_err(|e| Error::Bootstrap(format!("audio device not ready: {}", e)))?;

        let device = self
            .store
            .device(&self.device_id)
            .await?
            .ok_or_else(|| Error::Bootstrap(format!("device {} not found", self.device_id)))?;

        let group_id = device
            .group_ref()
            .ok_or_else(|| Error::Bootstrap("device has no group".to_string()))?;

        let group = self
            .store
            .group(group_id)
            .await?
            .ok_or_else(|| Error::Bootstrap(format!("group {} not found", group_id)))?;

        let target = group
            .playback_target()
            .or_else(|| {
                device
                    .stream_ref()
                    .map(|url| PlaybackTarget::Stream(url.to_string()))
            })
            .ok_or_else(|| Error::Bootstrap(format!("group {} has nothing to play", group.id)))?;

        self.playback.play_target(target.clone()).await?;
        self.playback.schedule_announcements(group).await?;
        Ok(BootstrapOutcome::Started(target))
    }
}
