//! Announcement interleaving tests

mod helpers;

use std::time::Duration;

use helpers::{stream_group, TestAgent, STREAM_A, STREAM_B};
use revive_agent::playback::PlaybackPhase;
use revive_agent::player::ProcessSignal;
use revive_common::models::{Group, MediaRef};

const CHIME: &str = "/announcements/chime.mp3";
const NOTICE: &str = "/announcements/notice.mp3";

fn announcing_group(announcements: &[&str]) -> Group {
    let mut group = stream_group("lobby", STREAM_A);
    group.announcements = announcements.iter().map(|a| MediaRef::new(*a)).collect();
    group.announcement_interval = Some(1);
    group.announcement_volume = Some(70);
    group
}

#[tokio::test(start_paused = true)]
async fn test_announcement_suspends_and_continues_music() {
    let agent = TestAgent::start();
    let music = agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME]))
        .await
        .unwrap();

    let spawns = agent.launcher.wait_for_spawns(2).await;
    let announcement = &spawns[1];
    assert_eq!(announcement.request.url, CHIME);
    assert_eq!(announcement.request.volume, Some(70));
    assert_eq!(agent.launcher.signals_for(music), vec![ProcessSignal::Stop]);
    assert!(agent.launcher.is_alive(music));

    let snapshot = agent.wait_for(|s| s.announcement_url.is_some()).await;
    assert_eq!(snapshot.announcement_url.as_deref(), Some(CHIME));
    assert_eq!(snapshot.phase, PlaybackPhase::Playing);

    agent.launcher.finish(announcement.pid, Some(0));
    agent.wait_for(|s| s.announcement_url.is_none()).await;

    assert_eq!(
        agent.launcher.signals_for(music),
        vec![ProcessSignal::Stop, ProcessSignal::Continue]
    );
    assert_eq!(agent.launcher.spawn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_announcements_rotate_through_list() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME, NOTICE]))
        .await
        .unwrap();

    let mut played = Vec::new();
    for n in 2..=4 {
        let spawns = agent.launcher.wait_for_spawns(n).await;
        let announcement = spawns[n - 1].clone();
        played.push(announcement.request.url.clone());
        agent.launcher.finish(announcement.pid, Some(0));
        agent.wait_for(|s| s.announcement_url.is_none()).await;
    }

    assert_eq!(played, vec![CHIME, NOTICE, CHIME]);
}

#[tokio::test(start_paused = true)]
async fn test_second_announcement_dropped_while_one_plays() {
    let agent = TestAgent::start();
    let music = agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME, NOTICE]))
        .await
        .unwrap();

    let spawns = agent.launcher.wait_for_spawns(2).await;
    let first = spawns[1].clone();

    // Next tick fires while the first announcement is still playing
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(agent.launcher.spawn_count(), 2);

    agent.launcher.finish(first.pid, Some(0));
    agent.wait_for(|s| s.announcement_url.is_none()).await;
    assert_eq!(agent.launcher.signals_for(music).last(), Some(&ProcessSignal::Continue));
}

#[tokio::test(start_paused = true)]
async fn test_paused_playback_gets_no_announcements() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME]))
        .await
        .unwrap();
    agent.playback.pause().await.unwrap();

    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(agent.launcher.spawn_count(), 1);
    assert_eq!(agent.playback.snapshot().phase, PlaybackPhase::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_pause_cancels_announcement_in_flight() {
    let agent = TestAgent::start();
    let music = agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME]))
        .await
        .unwrap();

    let spawns = agent.launcher.wait_for_spawns(2).await;
    let announcement = spawns[1].clone();

    agent.playback.pause().await.unwrap();

    assert_eq!(agent.launcher.signals_for(announcement.pid), vec![ProcessSignal::Kill]);
    let snapshot = agent.playback.snapshot();
    assert_eq!(snapshot.phase, PlaybackPhase::Paused);
    assert_eq!(snapshot.announcement_url, None);
    // Music stays stopped, not continued
    assert_eq!(agent.launcher.signals_for(music), vec![ProcessSignal::Stop]);
}

#[tokio::test(start_paused = true)]
async fn test_music_lost_during_announcement_is_restarted() {
    let agent = TestAgent::start();
    let music = agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME]))
        .await
        .unwrap();

    let spawns = agent.launcher.wait_for_spawns(2).await;
    let announcement = spawns[1].clone();

    agent.launcher.finish(music, None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(agent.launcher.spawn_count(), 2);

    agent.launcher.finish(announcement.pid, Some(0));

    let spawns = agent.launcher.wait_for_spawns(3).await;
    assert_eq!(spawns[2].request.url, STREAM_A);
    assert_eq!(spawns[2].request.volume, None);
    agent
        .wait_for(|s| s.phase == PlaybackPhase::Playing && s.announcement_url.is_none())
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_switching_stream_cancels_announcement() {
    let agent = TestAgent::start();
    let music = agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME]))
        .await
        .unwrap();

    let spawns = agent.launcher.wait_for_spawns(2).await;
    let announcement = spawns[1].clone();
    agent.wait_for(|s| s.announcement_url.is_some()).await;

    let replacement = agent.play_stream(STREAM_B).await;

    assert_eq!(agent.launcher.signals_for(announcement.pid), vec![ProcessSignal::Kill]);
    assert!(!agent.launcher.is_alive(announcement.pid));
    assert!(!agent.launcher.is_alive(music));
    assert!(agent.launcher.is_alive(replacement));
    let snapshot = agent.playback.snapshot();
    assert_eq!(snapshot.announcement_url, None);
    assert_eq!(snapshot.current_url.as_deref(), Some(STREAM_B));
    assert!(agent.launcher.signals_for(replacement).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_force_stop_clears_schedule() {
    let agent = TestAgent::start();
    agent.play_stream(STREAM_A).await;
    agent
        .playback
        .schedule_announcements(announcing_group(&[CHIME]))
        .await
        .unwrap();

    agent.playback.force_stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(agent.launcher.spawn_count(), 1);
}
