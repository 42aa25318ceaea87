mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{TestAgent, DEVICE_ID, STREAM_A};
use revive_agent::heartbeat::HeartbeatPublisher;
use revive_common::models::{DevicePatch, DeviceStatus};
use revive_common::store::ConfigSource;

fn publisher(agent: &TestAgent) -> HeartbeatPublisher {
    HeartbeatPublisher::new(
        DEVICE_ID,
        Arc::new(agent.store.clone()),
        agent.playback.clone(),
        Duration::from_secs(5),
    )
}

#[tokio::test(start_paused = true)]
async fn test_beat_reports_playing() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    agent
        .store
        .patch_device(DEVICE_ID, DevicePatch::status(DeviceStatus::Stopped, false))
        .await
        .unwrap();

    publisher(&agent).beat().await.unwrap();

    let device = agent.device();
    assert_eq!(device.status, DeviceStatus::Playing);
    assert!(device.is_playing);
    assert_eq!(device.current_url.as_deref(), Some(STREAM_A));
}

#[tokio::test(start_paused = true)]
async fn test_beat_clears_url_after_stop() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    publisher(&agent).beat().await.unwrap();
    assert_eq!(agent.device().current_url.as_deref(), Some(STREAM_A));

    agent.playback.force_stop().await.unwrap();
    assert_eq!(agent.device().current_url, None);

    publisher(&agent).beat().await.unwrap();

    let device = agent.device();
    assert_eq!(device.status, DeviceStatus::Online);
    assert!(!device.is_playing);
    assert_eq!(device.current_url, None);
}

#[tokio::test(start_paused = true)]
async fn test_beat_leaves_volume_alone() {
    let agent = TestAgent::start();
    agent
        .store
        .patch_device(DEVICE_ID, DevicePatch::volume(25))
        .await
        .unwrap();

    publisher(&agent).beat().await.unwrap();

    let device = agent.device();
    assert_eq!(device.volume, 25);
    assert_eq!(device.status, DeviceStatus::Online);
    assert!(!device.is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_run_refreshes_last_seen() {
    let agent = TestAgent::start();
    tokio::spawn(publisher(&agent).run());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let first = agent.device().last_seen.expect("first beat written");

    tokio::time::sleep(Duration::from_secs(11)).await;
    let later = agent.device().last_seen.expect("later beat written");
    assert!(later >= first);
}

#[tokio::test(start_paused = true)]
async fn test_beat_for_missing_device_fails() {
    let agent = TestAgent::start();
    let publisher = HeartbeatPublisher::new(
        "unknown-speaker",
        Arc::new(agent.store.clone()),
        agent.playback.clone(),
        Duration::from_secs(5),
    );

    assert!(publisher.beat().await.is_err());
}
