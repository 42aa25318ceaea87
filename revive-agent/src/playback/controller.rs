//! Playback controller actor
//!
//! A single task owns the primary renderer, the announcement renderer, the
//! announcement timer, and [`PlaybackState`]. Requests, renderer events,
//! announcement events and delayed restarts all arrive on channels and are
//! handled one at a time, so no lock guards playback state.
//!
//! # Exit handling
//!
//! - Paused, stopping, idle: the exit was expected.
//! - Announcement playing: the announcement completion brings music back.
//! - Playlist, exit code 0: advance to the next file (wrapping).
//! - Otherwise: replay the same URL.
//!
//! Exits before the renderer is verified count as failed starts. Restart
//! delay grows with consecutive failures; at the ceiling the controller
//! gives up and enters [`PlaybackPhase::Error`].

use std::sync::Arc;
use std::time::Duration;

use revive_common::models::{DevicePatch, DeviceStatus, Group, PlaybackTarget};
use revive_common::store::ConfigSource;
use revive_common::time::{linear_backoff, now};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::handle::{Action, PlaybackHandle, Request};
use super::state::{PlaybackPhase, PlaybackSnapshot, PlaybackState, Playlist};
use crate::announce::{
    AnnouncementEvent, AnnouncementPlayer, AnnouncementScheduler, FinishOutcome,
};
use crate::audio::AudioMixerControl;
use crate::config::TimingConfig;
use crate::error::{Error, Result};
use crate::player::{
    PlayerEvent, PlayerProcess, ProcessLauncher, ResumeOutcome, StartOutcome, SuspendOutcome,
};

/// Request queue depth
const REQUEST_CAPACITY: usize = 32;

/// Timing knobs for the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub verify_delay: Duration,
    pub switch_settle: Duration,
    pub restart_delay: Duration,
    pub max_start_failures: u32,
    pub announcement_warmup: Duration,
    pub announcement_settle: Duration,
}

impl From<&TimingConfig> for ControllerSettings {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            verify_delay: timing.start_verify_delay(),
            switch_settle: timing.switch_settle_delay(),
            restart_delay: timing.restart_delay(),
            max_start_failures: timing.max_start_failures.max(1),
            announcement_warmup: timing.announcement_warmup(),
            announcement_settle: timing.announcement_settle_delay(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

#[derive(Debug)]
struct RestartDue {
    token: u64,
    url: String,
}

pub struct PlaybackController {
    device_id: String,
    store: Arc<dyn ConfigSource>,
    mixer: Arc<AudioMixerControl>,
    player: PlayerProcess,
    announcer: AnnouncementPlayer,
    scheduler: AnnouncementScheduler,
    state: PlaybackState,
    restart_delay: Duration,
    max_start_failures: u32,
    requests: mpsc::Receiver<Request>,
    player_events: mpsc::UnboundedReceiver<PlayerEvent>,
    announcement_events: mpsc::UnboundedReceiver<AnnouncementEvent>,
    restarts_tx: mpsc::UnboundedSender<RestartDue>,
    restarts: mpsc::UnboundedReceiver<RestartDue>,
    snapshot: watch::Sender<PlaybackSnapshot>,
}

impl PlaybackController {
    pub fn new(
        device_id: impl Into<String>,
        store: Arc<dyn ConfigSource>,
        mixer: Arc<AudioMixerControl>,
        launcher: Arc<dyn ProcessLauncher>,
        settings: ControllerSettings,
    ) -> (Self, PlaybackHandle) {
        let (request_tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let (player_tx, player_events) = mpsc::unbounded_channel();
        let (announce_tx, announcement_events) = mpsc::unbounded_channel();
        let (restarts_tx, restarts) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot::default());

        let controller = Self {
            device_id: device_id.into(),
            store,
            mixer,
            player: PlayerProcess::new(
                launcher.clone(),
                player_tx,
                settings.verify_delay,
                settings.switch_settle,
            ),
            announcer: AnnouncementPlayer::new(
                launcher,
                announce_tx.clone(),
                settings.announcement_settle,
            ),
            scheduler: AnnouncementScheduler::new(announce_tx, settings.announcement_warmup),
            state: PlaybackState::default(),
            restart_delay: settings.restart_delay,
            max_start_failures: settings.max_start_failures,
            requests,
            player_events,
            announcement_events,
            restarts_tx,
            restarts,
            snapshot: snapshot_tx,
        };

        (controller, PlaybackHandle::new(request_tx, snapshot_rx))
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) {
        info!(device_id = %self.device_id, "Playback controller running");

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(Request { action, reply }) = request else {
                        self.shutdown().await;
                        break;
                    };
                    if matches!(action, Action::Shutdown) {
                        self.shutdown().await;
                        self.publish();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    let result = self.handle(action).await;
                    self.publish();
                    let _ = reply.send(result);
                }
                Some(event) = self.player_events.recv() => {
                    self.on_player_event(event).await;
                    self.publish();
                }
                Some(event) = self.announcement_events.recv() => {
                    self.on_announcement_event(event).await;
                    self.publish();
                }
                Some(due) = self.restarts.recv() => {
                    self.on_restart_due(due).await;
                    self.publish();
                }
            }
        }

        info!("Playback controller stopped");
    }

    async fn handle(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Play(url) => self.play(url).await,
            Action::PlayTarget(target) => self.play_target(target).await,
            Action::Pause => {
                self.pause().await;
                Ok(())
            }
            Action::Resume => self.resume().await,
            Action::ForceStop => {
                self.force_stop().await;
                Ok(())
            }
            Action::ScheduleAnnouncements(group) => {
                self.schedule_announcements(group);
                Ok(())
            }
            Action::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        }
    }

    fn publish(&self) {
        let next = self.state.snapshot(self.announcer.current_url());
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ---- requests ----

    async fn play(&mut self, url: Option<String>) -> Result<()> {
        if self.state.phase == PlaybackPhase::Starting {
            warn!("Start in progress, ignoring play request");
            return Ok(());
        }

        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            if self.state.phase == PlaybackPhase::Playing {
                debug!("Already playing");
                return Ok(());
            }
            return self.resume().await;
        };

        match self.state.phase {
            PlaybackPhase::Playing if self.state.current_url.as_deref() == Some(url.as_str()) => {
                debug!(url = %url, "Already playing this URL");
                Ok(())
            }
            PlaybackPhase::Paused if self.state.resume_url.as_deref() == Some(url.as_str()) => {
                self.resume().await
            }
            _ => {
                self.state.playlist = None;
                info!(url = %url, "Play requested");
                self.start(url).await;
                Ok(())
            }
        }
    }

    async fn play_target(&mut self, target: PlaybackTarget) -> Result<()> {
        match target {
            PlaybackTarget::Stream(url) => {
                let active = self.state.phase.is_active()
                    && !self.state.is_playlist()
                    && self.state.current_url.as_deref() == Some(url.as_str());
                if active {
                    debug!(url = %url, "Stream already active");
                    return Ok(());
                }
                self.state.playlist = None;
                info!(url = %url, "Playing stream");
                self.start(url).await;
            }
            PlaybackTarget::Playlist(files) => {
                let same = self
                    .state
                    .playlist
                    .as_ref()
                    .is_some_and(|p| p.files() == files.as_slice());
                if same && self.state.phase.is_active() {
                    debug!("Playlist already active");
                    return Ok(());
                }
                let playlist = Playlist::new(files)
                    .ok_or_else(|| Error::InvalidState("playlist is empty".to_string()))?;
                let first = playlist.current().to_string();
                info!(files = playlist.files().len(), first = %first, "Starting playlist");
                self.state.playlist = Some(playlist);
                self.start(first).await;
            }
        }
        Ok(())
    }

    async fn pause(&mut self) {
        match self.state.phase {
            PlaybackPhase::Paused => {
                debug!("Already paused");
                return;
            }
            PlaybackPhase::Idle | PlaybackPhase::Error | PlaybackPhase::Stopping => {
                debug!(phase = ?self.state.phase, "Nothing playing, ignoring pause");
                return;
            }
            PlaybackPhase::Starting | PlaybackPhase::Playing => {}
        }

        self.state.mark_paused();
        self.announcer.cancel().await;
        match self.player.suspend().await {
            SuspendOutcome::Suspended => {}
            SuspendOutcome::Terminated => warn!("Renderer terminated instead of suspended"),
            SuspendOutcome::NoProcess => debug!("No renderer running to suspend"),
        }
        self.scheduler.suspend();

        info!(url = ?self.state.resume_url, "Playback paused");
        self.report(DeviceStatus::Paused).await;
    }

    async fn resume(&mut self) -> Result<()> {
        match self.state.phase {
            PlaybackPhase::Playing | PlaybackPhase::Starting => {
                debug!("Already playing");
                return Ok(());
            }
            PlaybackPhase::Stopping => {
                return Err(Error::InvalidState("playback is stopping".to_string()));
            }
            PlaybackPhase::Paused if self.player.has_process() => {
                if self.player.resume().await == ResumeOutcome::Continued {
                    self.state.mark_playing();
                    self.scheduler.resume();
                    info!(url = ?self.state.current_url, "Playback resumed");
                    self.report(DeviceStatus::Playing).await;
                    return Ok(());
                }
            }
            PlaybackPhase::Paused | PlaybackPhase::Idle | PlaybackPhase::Error => {}
        }

        let url = self
            .state
            .resume_url
            .clone()
            .ok_or_else(|| Error::InvalidState("nothing to resume".to_string()))?;
        info!(url = %url, "Restarting remembered URL");
        self.start(url).await;
        Ok(())
    }

    async fn force_stop(&mut self) {
        let previous = self.state.phase;
        self.state.mark_stopping();
        self.announcer.cancel().await;
        self.player.terminate().await;
        self.scheduler.cancel();
        self.state.mark_idle();
        self.state.last_scheduled_group_id = None;

        if previous != PlaybackPhase::Idle {
            info!(from = ?previous, "Playback force-stopped");
        }
        self.report(DeviceStatus::Stopped).await;
    }

    fn schedule_announcements(&mut self, group: Group) {
        let outcome = self.scheduler.schedule(&group);
        debug!(group_id = %group.id, ?outcome, "Announcement schedule requested");
        self.state.last_scheduled_group_id = Some(group.id);
    }

    async fn shutdown(&mut self) {
        info!("Stopping playback for shutdown");
        self.announcer.cancel().await;
        self.player.terminate().await;
        self.scheduler.cancel();
        self.state.mark_idle();
        self.report(DeviceStatus::Stopped).await;
    }

    // ---- renderer lifecycle ----

    async fn start(&mut self, url: String) {
        if self.announcer.is_active() {
            info!(url = %url, "Switching playback, cancelling announcement");
            self.announcer.cancel().await;
        }
        self.state.begin_start(&url);
        self.spawn_renderer(&url).await;
    }

    async fn spawn_renderer(&mut self, url: &str) {
        self.mixer.reapply().await;

        let mut outcome = self.player.start(url).await;
        if outcome == StartOutcome::Busy {
            warn!(url, "Replacing renderer that never finished starting");
            self.player.terminate().await;
            outcome = self.player.start(url).await;
        }

        match outcome {
            StartOutcome::Spawned { generation } => {
                debug!(url, generation, "Waiting for renderer to settle")
            }
            StartOutcome::SpawnFailed { .. } => {}
            StartOutcome::Busy => error!(url, "Renderer slot still busy"),
            StartOutcome::EmptyUrl => self.state.mark_idle(),
        }
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        if !self.player.on_event(&event) {
            debug!(generation = event.generation(), "Ignoring event from superseded renderer");
            return;
        }

        match event {
            PlayerEvent::Started { pid, url, .. } => {
                if self.state.phase != PlaybackPhase::Starting {
                    debug!(pid, phase = ?self.state.phase, "Renderer verified outside start");
                    return;
                }
                self.state.mark_playing();
                info!(pid, url = %url, "Playback started");
                self.report(DeviceStatus::Playing).await;
                self.scheduler.resume();
            }
            PlayerEvent::Exited { url, code, .. } => self.on_exit(url, code).await,
            PlayerEvent::Failed { url, error, .. } => {
                error!(url = %url, error = %error, "Renderer failed to start");
                if self.state.phase == PlaybackPhase::Starting {
                    self.state.mark_error();
                    self.report(DeviceStatus::Stopped).await;
                }
            }
        }
    }

    async fn on_exit(&mut self, url: String, code: Option<i32>) {
        match self.state.phase {
            PlaybackPhase::Starting | PlaybackPhase::Playing => {}
            phase => {
                debug!(url = %url, ?code, ?phase, "Renderer exit expected");
                return;
            }
        }

        if self.announcer.is_active() {
            info!(url = %url, ?code, "Renderer exited during announcement");
            return;
        }

        let natural_playlist_end = self.state.is_playlist() && code == Some(0);
        if self.state.phase == PlaybackPhase::Starting && !natural_playlist_end {
            let failures = self.state.record_failed_start();
            if failures >= self.max_start_failures {
                error!(url = %url, failures, "Renderer keeps exiting at start, giving up");
                self.state.mark_error();
                self.report(DeviceStatus::Stopped).await;
                return;
            }
            warn!(url = %url, ?code, failures, "Renderer exited before it was verified");
        }

        let next = self.next_url_after_exit(url, code);
        let delay = linear_backoff(
            self.state.start_failures,
            self.restart_delay,
            self.restart_delay.saturating_mul(self.max_start_failures),
        );
        self.schedule_restart(next, delay);
    }

    fn next_url_after_exit(&mut self, finished: String, code: Option<i32>) -> String {
        match self.state.playlist.as_mut() {
            Some(playlist) if code == Some(0) => match playlist.advance_after(&finished) {
                Some(next) => {
                    let next = next.to_string();
                    info!(finished = %finished, next = %next, index = playlist.index(), "Advancing playlist");
                    next
                }
                None => {
                    warn!(url = %finished, "Finished file not in playlist, replaying it");
                    finished
                }
            },
            Some(_) => {
                warn!(url = %finished, ?code, "Playlist item exited abnormally, retrying it");
                finished
            }
            None => {
                info!(url = %finished, ?code, "Stream ended, restarting");
                finished
            }
        }
    }

    fn schedule_restart(&mut self, url: String, delay: Duration) {
        self.state.begin_start(&url);
        let token = self.state.transition;
        let restarts = self.restarts_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = restarts.send(RestartDue { token, url });
        });
    }

    async fn on_restart_due(&mut self, due: RestartDue) {
        if due.token != self.state.transition || self.state.phase != PlaybackPhase::Starting {
            debug!(url = %due.url, "Discarding superseded restart");
            return;
        }
        self.spawn_renderer(&due.url).await;
    }

    // ---- announcements ----

    async fn on_announcement_event(&mut self, event: AnnouncementEvent) {
        match event {
            AnnouncementEvent::Due(due) => {
                let paused = match self.state.phase {
                    PlaybackPhase::Playing => false,
                    PlaybackPhase::Paused => true,
                    phase => {
                        debug!(url = %due.url, ?phase, "Nothing playing, skipping announcement");
                        return;
                    }
                };
                let outcome = self
                    .announcer
                    .play(&mut self.player, &due.url, due.volume, paused)
                    .await;
                debug!(index = due.index, ?outcome, "Announcement due");
            }
            AnnouncementEvent::Finished { flight, url, outcome } => {
                match &outcome {
                    Ok(code) => debug!(url = %url, ?code, "Announcement renderer exited"),
                    Err(e) => warn!(url = %url, error = %e, "Announcement could not play"),
                }
                let resume_music = self.state.phase == PlaybackPhase::Playing;
                match self.announcer.finish(flight, &mut self.player, resume_music).await {
                    FinishOutcome::Stale => debug!(flight, "Ignoring stale announcement completion"),
                    FinishOutcome::Resumed => info!("Music resumed after announcement"),
                    FinishOutcome::LeftStopped => {}
                    FinishOutcome::NeedsRestart => match self.state.current_url.clone() {
                        Some(url) => {
                            warn!(url = %url, "Music renderer lost during announcement, restarting");
                            self.start(url).await;
                        }
                        None => warn!("Music renderer lost during announcement, nothing to restart"),
                    },
                }
            }
        }
    }

    // ---- reporting ----

    async fn report(&self, status: DeviceStatus) {
        let playing = status == DeviceStatus::Playing;
        let patch = DevicePatch {
            status: Some(status),
            is_playing: Some(playing),
            current_url: match status {
                DeviceStatus::Playing => Some(self.state.current_url.clone()),
                DeviceStatus::Stopped => Some(None),
                _ => None,
            },
            last_seen: Some(now()),
            ..Default::default()
        };
        if let Err(e) = self.store.patch_device(&self.device_id, patch).await {
            warn!(status = %status, error = %e, "Failed to report playback status");
        }
    }
}
