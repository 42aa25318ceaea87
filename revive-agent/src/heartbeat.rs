//! Periodic liveness reporting

use std::sync::Arc;
use std::time::Duration;

use revive_common::models::DevicePatch;
use revive_common::store::ConfigSource;
use revive_common::time::now;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;
use crate::playback::PlaybackHandle;

pub struct HeartbeatPublisher {
    device_id: String,
    store: Arc<dyn ConfigSource>,
    playback: PlaybackHandle,
    interval: Duration,
}

impl HeartbeatPublisher {
    pub fn new(
        device_id: impl Into<String>,
        store: Arc<dyn ConfigSource>,
        playback: PlaybackHandle,
        interval: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            store,
            playback,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.beat().await {
                warn!(error = %e, "Heartbeat failed");
            }
        }
    }

    /// Write one heartbeat from the current playback snapshot
    pub async fn beat(&self) -> Result<()> {
        let snapshot = self.playback.snapshot();
        let status = snapshot.device_status();
        // Cleared whenever nothing is loaded
        let current_url = snapshot
            .current_url
            .clone()
            .filter(|_| snapshot.phase.is_active());
        let patch = DevicePatch {
            status: Some(status),
            is_playing: Some(snapshot.is_playing()),
            current_url: Some(current_url),
            last_seen: Some(now()),
            ..Default::default()
        };
        self.store.patch_device(&self.device_id, patch).await?;
        debug!(status = %status, "Heartbeat sent");
        Ok(())
    }
}
