//! Shared fixtures for agent integration tests
//!
//! - FakeLauncher: renderer processes the test ends by hand
//! - FakeMixer: records raw mixer values, scriptable probe failures
//! - TestAgent: a running controller over an in-memory store

#![allow(dead_code)]

pub mod fake_launcher;
pub mod fake_mixer;

use std::sync::Arc;
use std::time::Duration;

use revive_agent::audio::{AudioMixerControl, MixerRange};
use revive_agent::playback::{
    ControllerSettings, PlaybackController, PlaybackHandle, PlaybackPhase, PlaybackSnapshot,
};
use revive_common::models::{Device, Group, MediaRef};
use revive_common::store::MemoryStore;

pub use fake_launcher::{FakeLauncher, SpawnRecord};
pub use fake_mixer::FakeMixer;

pub const DEVICE_ID: &str = "speaker-1";
pub const STREAM_A: &str = "http://radio.example/a";
pub const STREAM_B: &str = "http://radio.example/b";

pub fn mixer_range() -> MixerRange {
    MixerRange::new(-10239, 400)
}

pub fn settings() -> ControllerSettings {
    ControllerSettings {
        verify_delay: Duration::from_secs(2),
        switch_settle: Duration::from_millis(1500),
        restart_delay: Duration::from_secs(1),
        max_start_failures: 3,
        announcement_warmup: Duration::from_secs(60),
        announcement_settle: Duration::from_millis(500),
    }
}

pub fn stream_group(id: &str, url: &str) -> Group {
    let mut group = Group::new(id);
    group.stream_url = Some(url.to_string());
    group
}

pub fn playlist_group(id: &str, files: &[&str]) -> Group {
    let mut group = Group::new(id);
    group.local_files = files.iter().map(|f| MediaRef::new(*f)).collect();
    group
}

pub struct TestAgent {
    pub store: MemoryStore,
    pub launcher: Arc<FakeLauncher>,
    pub mixer_backend: Arc<FakeMixer>,
    pub mixer: Arc<AudioMixerControl>,
    pub playback: PlaybackHandle,
}

impl TestAgent {
    pub fn start() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        let store = MemoryStore::new();
        store.put_device(Device::new(DEVICE_ID));

        let launcher = FakeLauncher::new();
        let mixer_backend = FakeMixer::new();
        let mixer = Arc::new(AudioMixerControl::new(
            mixer_backend.clone(),
            mixer_range(),
            DEVICE_ID,
            Arc::new(store.clone()),
        ));

        let (controller, playback) = PlaybackController::new(
            DEVICE_ID,
            Arc::new(store.clone()),
            mixer.clone(),
            launcher.clone(),
            settings,
        );
        tokio::spawn(controller.run());

        Self {
            store,
            launcher,
            mixer_backend,
            mixer,
            playback,
        }
    }

    pub fn device(&self) -> Device {
        self.store.device_snapshot(DEVICE_ID).expect("device exists")
    }

    pub async fn wait_for(&self, mut done: impl FnMut(&PlaybackSnapshot) -> bool) -> PlaybackSnapshot {
        let mut rx = self.playback.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| done(s)))
            .await
            .expect("timed out waiting for playback state")
            .expect("controller stopped")
            .clone();
        snapshot
    }

    pub async fn wait_for_phase(&self, phase: PlaybackPhase) -> PlaybackSnapshot {
        self.wait_for(|s| s.phase == phase).await
    }

    /// Play a stream and wait until it is verified; returns its pid
    pub async fn play_stream(&self, url: &str) -> u32 {
        self.playback.play(Some(url.to_string())).await.unwrap();
        self.wait_for(|s| s.phase == PlaybackPhase::Playing && s.current_url.as_deref() == Some(url))
            .await;
        self.launcher.last_spawn().pid
    }
}
