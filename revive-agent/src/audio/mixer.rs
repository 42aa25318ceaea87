//! Output volume through the system mixer
//!
//! Volume is expressed to the rest of the agent as a percentage. The mixer
//! control takes raw device units; the percentage maps linearly onto the
//! configured raw range. Mixer failures never block playback: they are
//! logged and the in-memory volume still moves, so the next reapply or
//! volume change retries the hardware.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use revive_common::models::DevicePatch;
use revive_common::store::ConfigSource;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::MixerConfig;
use crate::error::{Error, Result};

/// Raw mixer units for 0 % and 100 %
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerRange {
    pub min: i64,
    pub max: i64,
}

impl MixerRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Map a percentage onto raw units, rounding to the nearest unit
    pub fn to_raw(&self, percent: u8) -> i64 {
        let fraction = f64::from(percent.min(100)) / 100.0;
        let span = (self.max - self.min) as f64;
        (self.min as f64 + fraction * span).round() as i64
    }
}

impl From<&MixerConfig> for MixerRange {
    fn from(config: &MixerConfig) -> Self {
        Self::new(config.raw_min, config.raw_max)
    }
}

/// Hardware side of the mixer
#[async_trait]
pub trait MixerBackend: Send + Sync {
    /// Set the control to a raw value
    async fn apply_raw(&self, raw: i64) -> Result<()>;

    /// Check the control is reachable
    async fn probe(&self) -> Result<()>;
}

/// `amixer`-driven backend
pub struct AmixerBackend {
    program: String,
    control: String,
}

impl AmixerBackend {
    pub fn new(config: &MixerConfig) -> Self {
        Self {
            program: config.program.clone(),
            control: config.control.clone(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Mixer(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Mixer(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl MixerBackend for AmixerBackend {
    async fn apply_raw(&self, raw: i64) -> Result<()> {
        // `--` keeps negative values from parsing as options
        let raw = raw.to_string();
        self.run(&["set", &self.control, "--", &raw]).await
    }

    async fn probe(&self) -> Result<()> {
        self.run(&["get", &self.control]).await
    }
}

/// Percentage volume control persisted to the device record
pub struct AudioMixerControl {
    backend: Arc<dyn MixerBackend>,
    range: MixerRange,
    device_id: String,
    store: Arc<dyn ConfigSource>,
    current: Mutex<Option<u8>>,
}

impl AudioMixerControl {
    pub fn new(
        backend: Arc<dyn MixerBackend>,
        range: MixerRange,
        device_id: impl Into<String>,
        store: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            backend,
            range,
            device_id: device_id.into(),
            store,
            current: Mutex::new(None),
        }
    }

    /// Last volume set, `None` until the first `set_volume`
    pub fn current(&self) -> Option<u8> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clamp, apply, and persist a volume; returns the applied percentage
    pub async fn set_volume(&self, percent: i64) -> u8 {
        let clamped = percent.clamp(0, 100) as u8;
        let raw = self.range.to_raw(clamped);

        if let Err(e) = self.backend.apply_raw(raw).await {
            error!(volume = clamped, raw, error = %e, "Failed to apply mixer volume");
        }

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(clamped);

        if let Err(e) = self
            .store
            .patch_device(&self.device_id, DevicePatch::volume(clamped))
            .await
        {
            warn!(volume = clamped, error = %e, "Failed to persist volume");
        }

        info!(volume = clamped, raw, "Volume set");
        clamped
    }

    /// Push the current volume to the hardware again without persisting
    pub async fn reapply(&self) {
        let Some(volume) = self.current() else {
            return;
        };
        let raw = self.range.to_raw(volume);
        match self.backend.apply_raw(raw).await {
            Ok(()) => debug!(volume, raw, "Mixer volume reapplied"),
            Err(e) => warn!(volume, raw, error = %e, "Failed to reapply mixer volume"),
        }
    }

    pub async fn probe(&self) -> Result<()> {
        self.backend.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revive_common::models::Device;
    use revive_common::store::MemoryStore;

    struct RecordingBackend {
        applied: Mutex<Vec<i64>>,
        fail: bool,
    }

    #[async_trait]
    impl MixerBackend for RecordingBackend {
        async fn apply_raw(&self, raw: i64) -> Result<()> {
            self.applied.lock().unwrap().push(raw);
            if self.fail {
                Err(Error::Mixer("device busy".into()))
            } else {
                Ok(())
            }
        }

        async fn probe(&self) -> Result<()> {
            Ok(())
        }
    }

    fn control(fail: bool) -> (Arc<RecordingBackend>, MemoryStore, AudioMixerControl) {
        let backend = Arc::new(RecordingBackend {
            applied: Mutex::new(Vec::new()),
            fail,
        });
        let store = MemoryStore::new();
        store.put_device(Device::new("d1"));
        let mixer = AudioMixerControl::new(
            backend.clone(),
            MixerRange::new(-10239, 400),
            "d1",
            Arc::new(store.clone()),
        );
        (backend, store, mixer)
    }

    #[test]
    fn test_mapping_endpoints() {
        let range = MixerRange::new(-10239, 400);
        assert_eq!(range.to_raw(0), -10239);
        assert_eq!(range.to_raw(100), 400);
        assert_eq!(range.to_raw(50), -4920);
    }

    #[test]
    fn test_mapping_monotonic_and_in_range() {
        let range = MixerRange::new(-10239, 400);
        let mut previous = i64::MIN;
        for percent in 0..=100u8 {
            let raw = range.to_raw(percent);
            assert!(raw >= previous, "not monotonic at {}", percent);
            assert!((range.min..=range.max).contains(&raw));
            previous = raw;
        }
    }

    #[test]
    fn test_mapping_clamps_above_hundred() {
        let range = MixerRange::new(0, 1000);
        assert_eq!(range.to_raw(250), 1000);
    }

    #[tokio::test]
    async fn test_set_volume_applies_and_persists() {
        let (backend, store, mixer) = control(false);

        assert_eq!(mixer.set_volume(40).await, 40);

        assert_eq!(*backend.applied.lock().unwrap(), vec![MixerRange::new(-10239, 400).to_raw(40)]);
        assert_eq!(mixer.current(), Some(40));
        assert_eq!(store.device_snapshot("d1").unwrap().volume, 40);
    }

    #[tokio::test]
    async fn test_set_volume_clamps() {
        let (_backend, store, mixer) = control(false);
        assert_eq!(mixer.set_volume(180).await, 100);
        assert_eq!(mixer.set_volume(-5).await, 0);
        assert_eq!(store.device_snapshot("d1").unwrap().volume, 0);
    }

    #[tokio::test]
    async fn test_mixer_failure_still_updates_current() {
        let (_backend, store, mixer) = control(true);
        assert_eq!(mixer.set_volume(70).await, 70);
        assert_eq!(mixer.current(), Some(70));
        assert_eq!(store.device_snapshot("d1").unwrap().volume, 70);
    }

    #[tokio::test]
    async fn test_reapply_without_volume_is_noop() {
        let (backend, _store, mixer) = control(false);
        mixer.reapply().await;
        assert!(backend.applied.lock().unwrap().is_empty());
    }
}
