//! Device and group reconciliation tests

mod helpers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use helpers::{mixer_range, playlist_group, stream_group, TestAgent, DEVICE_ID, STREAM_A, STREAM_B};
use revive_agent::playback::PlaybackPhase;
use revive_agent::watcher::ConfigWatcher;
use revive_common::models::{Device, DevicePatch, DeviceStatus, Group};
use revive_common::store::{ChangeStream, ConfigSource, GroupChange, MemoryStore};
use revive_common::{Error, Result};

/// Store whose group reads fail a set number of times
struct FlakyGroups {
    inner: MemoryStore,
    failures: AtomicU32,
}

#[async_trait]
impl ConfigSource for FlakyGroups {
    async fn device(&self, id: &str) -> Result<Option<Device>> {
        self.inner.device(id).await
    }

    async fn group(&self, id: &str) -> Result<Option<Group>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Internal("store unavailable".into()));
        }
        self.inner.group(id).await
    }

    async fn patch_device(&self, id: &str, patch: DevicePatch) -> Result<()> {
        self.inner.patch_device(id, patch).await
    }

    async fn clear_group_reference(&self, device_id: &str) -> Result<()> {
        self.inner.clear_group_reference(device_id).await
    }

    fn watch_device(&self, id: &str) -> ChangeStream<Option<Device>> {
        self.inner.watch_device(id)
    }

    fn watch_groups(&self) -> ChangeStream<GroupChange> {
        self.inner.watch_groups()
    }
}

fn watcher(agent: &TestAgent) -> ConfigWatcher {
    ConfigWatcher::new(
        DEVICE_ID,
        Arc::new(agent.store.clone()),
        agent.playback.clone(),
        agent.mixer.clone(),
    )
}

fn device_in(group_id: Option<&str>) -> Device {
    let mut device = Device::new(DEVICE_ID);
    device.group_id = group_id.map(str::to_string);
    device
}

#[tokio::test(start_paused = true)]
async fn test_no_group_stops_without_group_read() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device_in(None))).await.unwrap();

    assert_eq!(agent.playback.snapshot().phase, PlaybackPhase::Idle);
    assert_eq!(agent.store.group_reads(), 0);
    assert_eq!(agent.device().status, DeviceStatus::Stopped);
    assert!(watcher.cached_group().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_empty_group_id_treated_as_none() {
    let agent = TestAgent::start();
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device_in(Some("")))).await.unwrap();

    assert_eq!(agent.store.group_reads(), 0);
    assert_eq!(agent.launcher.spawn_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dangling_group_reference_is_cleared() {
    let agent = TestAgent::start();
    agent.store.put_device(device_in(Some("ghost")));
    let mut watcher = watcher(&agent);

    watcher
        .on_device(Some(device_in(Some("ghost"))))
        .await
        .unwrap();

    assert_eq!(agent.device().group_id, None);
    assert_eq!(agent.playback.snapshot().phase, PlaybackPhase::Idle);
    assert_eq!(agent.launcher.spawn_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_group_plays_and_applies_volume() {
    let agent = TestAgent::start();
    agent.store.put_group(stream_group("lobby", STREAM_A));
    let mut device = device_in(Some("lobby"));
    device.volume = 60;
    agent.store.put_device(device.clone());
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device)).await.unwrap();

    assert_eq!(agent.mixer_backend.applied().first(), Some(&mixer_range().to_raw(60)));
    assert_eq!(agent.mixer.current(), Some(60));
    agent.wait_for_phase(PlaybackPhase::Playing).await;
    assert_eq!(agent.launcher.urls(), vec![STREAM_A]);
    assert_eq!(watcher.cached_group().map(|g| g.id.as_str()), Some("lobby"));
}

#[tokio::test(start_paused = true)]
async fn test_device_stream_used_when_group_has_none() {
    let agent = TestAgent::start();
    agent.store.put_group(revive_common::models::Group::new("lobby"));
    let mut device = device_in(Some("lobby"));
    device.stream_url = Some(STREAM_B.to_string());
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device)).await.unwrap();

    agent.wait_for_phase(PlaybackPhase::Playing).await;
    assert_eq!(agent.launcher.urls(), vec![STREAM_B]);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_snapshot_is_skipped() {
    let agent = TestAgent::start();
    agent.store.put_group(stream_group("lobby", STREAM_A));
    let device = device_in(Some("lobby"));
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device.clone())).await.unwrap();
    let mut heartbeat_only = device.clone();
    heartbeat_only.status = DeviceStatus::Playing;
    heartbeat_only.last_seen = Some(chrono::Utc::now());
    watcher.on_device(Some(heartbeat_only)).await.unwrap();

    assert_eq!(agent.store.group_reads(), 1);
    agent.wait_for_phase(PlaybackPhase::Playing).await;
    assert_eq!(agent.launcher.spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_group_stream_change_switches() {
    let agent = TestAgent::start();
    agent.store.put_group(stream_group("lobby", STREAM_A));
    agent.store.put_device(device_in(Some("lobby")));
    let mut watcher = watcher(&agent);
    watcher
        .on_device(Some(device_in(Some("lobby"))))
        .await
        .unwrap();
    agent.wait_for_phase(PlaybackPhase::Playing).await;

    watcher
        .on_group_change(GroupChange::Updated(stream_group("lobby", STREAM_B)))
        .await
        .unwrap();

    agent
        .wait_for(|s| s.phase == PlaybackPhase::Playing && s.current_url.as_deref() == Some(STREAM_B))
        .await;
    assert_eq!(agent.launcher.urls(), vec![STREAM_A, STREAM_B]);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_group_change_ignored() {
    let agent = TestAgent::start();
    agent.store.put_group(stream_group("lobby", STREAM_A));
    let mut watcher = watcher(&agent);
    watcher
        .on_device(Some(device_in(Some("lobby"))))
        .await
        .unwrap();
    agent.wait_for_phase(PlaybackPhase::Playing).await;

    watcher
        .on_group_change(GroupChange::Updated(stream_group("patio", STREAM_B)))
        .await
        .unwrap();
    watcher
        .on_group_change(GroupChange::Removed("patio".to_string()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(agent.launcher.urls(), vec![STREAM_A]);
    assert_eq!(agent.playback.snapshot().phase, PlaybackPhase::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_group_removal_stops_and_clears_reference() {
    let agent = TestAgent::start();
    agent.store.put_group(stream_group("lobby", STREAM_A));
    agent.store.put_device(device_in(Some("lobby")));
    let mut watcher = watcher(&agent);
    watcher
        .on_device(Some(device_in(Some("lobby"))))
        .await
        .unwrap();
    let pid = {
        agent.wait_for_phase(PlaybackPhase::Playing).await;
        agent.launcher.last_spawn().pid
    };

    watcher
        .on_group_change(GroupChange::Removed("lobby".to_string()))
        .await
        .unwrap();

    assert_eq!(agent.playback.snapshot().phase, PlaybackPhase::Idle);
    assert!(!agent.launcher.is_alive(pid));
    assert_eq!(agent.device().group_id, None);
    assert!(watcher.cached_group().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_playlist_not_interrupted_by_stream_change() {
    let agent = TestAgent::start();
    agent
        .store
        .put_group(playlist_group("mix", &["/music/a.mp3", "/music/b.mp3"]));
    let mut device = device_in(Some("mix"));
    device.stream_url = Some(STREAM_A.to_string());
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device.clone())).await.unwrap();
    agent.wait_for_phase(PlaybackPhase::Playing).await;

    device.stream_url = Some(STREAM_B.to_string());
    watcher.on_device(Some(device)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(agent.launcher.urls(), vec!["/music/a.mp3"]);
    assert!(agent.playback.snapshot().in_playlist());
}

#[tokio::test(start_paused = true)]
async fn test_leaving_playlist_mode_plays_stream() {
    let agent = TestAgent::start();
    let mut group = playlist_group("mix", &["/music/a.mp3"]);
    group.stream_url = Some(STREAM_A.to_string());
    agent.store.put_group(group.clone());
    agent.store.put_device(device_in(Some("mix")));
    let mut watcher = watcher(&agent);

    watcher.on_device(Some(device_in(Some("mix")))).await.unwrap();
    agent.wait_for_phase(PlaybackPhase::Playing).await;

    group.local_files.clear();
    watcher
        .on_group_change(GroupChange::Updated(group))
        .await
        .unwrap();

    agent
        .wait_for(|s| s.phase == PlaybackPhase::Playing && s.current_url.as_deref() == Some(STREAM_A))
        .await;
    assert!(!agent.playback.snapshot().in_playlist());
}

#[tokio::test(start_paused = true)]
async fn test_missing_device_stops_playback() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    let mut watcher = watcher(&agent);

    watcher.on_device(None).await.unwrap();

    assert_eq!(agent.playback.snapshot().phase, PlaybackPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_run_follows_store_changes() {
    let agent = TestAgent::start();
    tokio::spawn(watcher(&agent).run());

    agent.store.put_group(stream_group("lobby", STREAM_A));
    agent.store.put_device(device_in(Some("lobby")));
    agent
        .wait_for(|s| s.phase == PlaybackPhase::Playing && s.current_url.as_deref() == Some(STREAM_A))
        .await;

    agent.store.remove_group("lobby");
    agent.wait_for_phase(PlaybackPhase::Idle).await;

    for _ in 0..100 {
        if agent.device().group_id.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("group reference was not cleared");
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconcile_retries_same_snapshot() {
    let agent = TestAgent::start();
    agent.store.put_group(stream_group("lobby", STREAM_A));
    agent.store.put_device(device_in(Some("lobby")));
    let store = Arc::new(FlakyGroups {
        inner: agent.store.clone(),
        failures: AtomicU32::new(1),
    });
    let mut watcher = ConfigWatcher::new(DEVICE_ID, store, agent.playback.clone(), agent.mixer.clone());

    assert!(watcher.on_device(Some(device_in(Some("lobby")))).await.is_err());
    assert_eq!(agent.launcher.spawn_count(), 0);

    watcher.on_device(Some(device_in(Some("lobby")))).await.unwrap();

    agent.wait_for_phase(PlaybackPhase::Playing).await;
    assert_eq!(agent.launcher.urls(), vec![STREAM_A]);
    assert_eq!(watcher.cached_group().map(|g| g.id.as_str()), Some("lobby"));
}
