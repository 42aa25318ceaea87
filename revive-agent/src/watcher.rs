//! Device and group configuration reconciliation
//!
//! Follows the device record and the group it references, and drives the
//! playback controller toward what they describe. A device without a valid
//! group has no playback target and is stopped; a dangling group reference
//! is removed from the device record.

use std::sync::Arc;

use futures::StreamExt;
use revive_common::models::{Device, Group, PlaybackTarget};
use revive_common::store::{ConfigSource, GroupChange};
use tracing::{debug, info, warn};

use crate::audio::AudioMixerControl;
use crate::error::Result;
use crate::playback::PlaybackHandle;

/// Device fields that drive playback
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceConfig {
    group_id: Option<String>,
    volume: u8,
    stream_url: Option<String>,
}

impl From<&Device> for DeviceConfig {
    fn from(device: &Device) -> Self {
        Self {
            group_id: device.group_ref().map(str::to_string),
            volume: device.volume,
            stream_url: device.stream_ref().map(str::to_string),
        }
    }
}

pub struct ConfigWatcher {
    device_id: String,
    store: Arc<dyn ConfigSource>,
    playback: PlaybackHandle,
    mixer: Arc<AudioMixerControl>,
    cached_group: Option<Group>,
    last_device: Option<DeviceConfig>,
    /// Last stream URL reconciled, to tell first assignment from a change
    last_stream: Option<String>,
}

impl ConfigWatcher {
    pub fn new(
        device_id: impl Into<String>,
        store: Arc<dyn ConfigSource>,
        playback: PlaybackHandle,
        mixer: Arc<AudioMixerControl>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            store,
            playback,
            mixer,
            cached_group: None,
            last_device: None,
            last_stream: None,
        }
    }

    pub fn cached_group(&self) -> Option<&Group> {
        self.cached_group.as_ref()
    }

    pub async fn run(mut self) {
        info!(device_id = %self.device_id, "Watching device configuration");
        let mut devices = self.store.watch_device(&self.device_id);
        let mut groups = self.store.watch_groups();

        loop {
            tokio::select! {
                next = devices.next() => {
                    let Some(device) = next else {
                        warn!("Device feed ended");
                        break;
                    };
                    if let Err(e) = self.on_device(device).await {
                        warn!(error = %e, "Device reconciliation failed");
                    }
                }
                Some(change) = groups.next() => {
                    if let Err(e) = self.on_group_change(change).await {
                        warn!(error = %e, "Group reconciliation failed");
                    }
                }
            }
        }
    }

    /// Reconcile one device snapshot; unchanged snapshots are skipped
    pub async fn on_device(&mut self, device: Option<Device>) -> Result<()> {
        let Some(device) = device else {
            if self.last_device.take().is_some() || self.cached_group.is_some() {
                warn!(device_id = %self.device_id, "Device record missing, stopping playback");
            }
            self.forget_group();
            return self.playback.force_stop().await;
        };

        let config = DeviceConfig::from(&device);
        if self.last_device.as_ref() == Some(&config) {
            debug!("Device change does not affect playback");
            return Ok(());
        }

        let result = self.reconcile_device(&device).await;
        if result.is_ok() {
            self.last_device = Some(config);
        } else {
            // Retry the same snapshot on its next delivery
            self.last_device = None;
            self.last_stream = None;
        }
        result
    }

    async fn reconcile_device(&mut self, device: &Device) -> Result<()> {
        if self.mixer.current() != Some(device.volume) {
            self.mixer.set_volume(i64::from(device.volume)).await;
        }

        let Some(group_id) = device.group_ref() else {
            info!("Device has no group, stopping playback");
            self.forget_group();
            return self.playback.force_stop().await;
        };

        match self.store.group(group_id).await? {
            Some(group) => self.apply_group(group, device.stream_ref()).await,
            None => {
                warn!(group_id, "Group no longer exists, clearing reference");
                self.drop_dangling_group().await
            }
        }
    }

    /// React to a change of the cached group
    pub async fn on_group_change(&mut self, change: GroupChange) -> Result<()> {
        let Some(cached) = &self.cached_group else {
            return Ok(());
        };
        if cached.id != change.group_id() {
            return Ok(());
        }

        match change {
            GroupChange::Updated(group) => {
                if *cached == group {
                    return Ok(());
                }
                info!(group_id = %group.id, "Group configuration changed");
                let device = self.store.device(&self.device_id).await?;
                let stream = device.as_ref().and_then(Device::stream_ref);
                self.apply_group(group, stream).await
            }
            GroupChange::Removed(group_id) => {
                warn!(group_id = %group_id, "Group deleted, clearing reference");
                self.drop_dangling_group().await
            }
        }
    }

    async fn apply_group(&mut self, group: Group, device_stream: Option<&str>) -> Result<()> {
        self.playback.schedule_announcements(group.clone()).await?;

        let stream = group
            .stream_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(device_stream)
            .map(str::to_string);
        let previous = std::mem::replace(&mut self.last_stream, stream.clone());
        let target = group.playback_target();
        self.cached_group = Some(group);

        if let Some(target @ PlaybackTarget::Playlist(_)) = target {
            if stream.is_some() && previous.is_some() && stream != previous {
                info!("Playlist in progress, ignoring stream change");
            }
            return self.playback.play_target(target).await;
        }

        let Some(url) = stream else {
            debug!("Group has nothing to play");
            return Ok(());
        };

        match previous {
            None => {
                info!(url = %url, "Stream assigned");
                self.playback.play_target(PlaybackTarget::Stream(url)).await
            }
            Some(previous) if previous != url => {
                info!(from = %previous, to = %url, "Stream changed");
                self.playback.play_target(PlaybackTarget::Stream(url)).await
            }
            Some(_) if self.playback.snapshot().in_playlist() => {
                info!(url = %url, "Group left playlist mode");
                self.playback.play_target(PlaybackTarget::Stream(url)).await
            }
            Some(_) => Ok(()),
        }
    }

    async fn drop_dangling_group(&mut self) -> Result<()> {
        self.forget_group();
        self.playback.force_stop().await?;
        self.store.clear_group_reference(&self.device_id).await?;
        Ok(())
    }

    fn forget_group(&mut self) {
        self.cached_group = None;
        self.last_stream = None;
    }
}
