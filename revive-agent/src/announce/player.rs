//! Plays one announcement over suspended music
//!
//! The primary renderer is stop-signalled, not killed, so music picks up
//! exactly where it left off. Only one announcement may be in flight.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::AnnouncementEvent;
use crate::player::{
    PlayerProcess, ProcessLauncher, ProcessSignal, RenderRequest, ResumeOutcome, SuspendOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started { flight: u64 },
    /// Another announcement is still playing
    DroppedInFlight,
    /// Music is paused by the user
    SkippedPaused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Not the current flight
    Stale,
    /// Music continued from where it stopped
    Resumed,
    /// Music process is gone; restart it from the remembered URL
    NeedsRestart,
    /// Nothing was playing before, or resuming was not wanted
    LeftStopped,
}

struct Flight {
    id: u64,
    url: String,
    was_playing: bool,
    pid: Arc<AtomicU32>,
    task: JoinHandle<()>,
}

pub struct AnnouncementPlayer {
    launcher: Arc<dyn ProcessLauncher>,
    events: mpsc::UnboundedSender<AnnouncementEvent>,
    settle_delay: Duration,
    in_flight: Option<Flight>,
    next_flight: u64,
}

impl AnnouncementPlayer {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        events: mpsc::UnboundedSender<AnnouncementEvent>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            launcher,
            events,
            settle_delay,
            in_flight: None,
            next_flight: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|f| f.url.as_str())
    }

    /// Suspend the primary and start the announcement renderer
    pub async fn play(
        &mut self,
        primary: &mut PlayerProcess,
        url: &str,
        volume: u8,
        paused_by_user: bool,
    ) -> PlayOutcome {
        if self.in_flight.is_some() {
            info!(url, "Announcement already playing, dropping");
            return PlayOutcome::DroppedInFlight;
        }
        if paused_by_user {
            debug!(url, "Playback paused, skipping announcement");
            return PlayOutcome::SkippedPaused;
        }

        let was_playing = match primary.suspend().await {
            SuspendOutcome::Suspended | SuspendOutcome::Terminated => true,
            SuspendOutcome::NoProcess => false,
        };

        self.next_flight += 1;
        let flight = self.next_flight;
        let pid = Arc::new(AtomicU32::new(0));

        let task = tokio::spawn(render(
            self.launcher.clone(),
            self.events.clone(),
            self.settle_delay,
            flight,
            RenderRequest::new(url).with_volume(volume),
            pid.clone(),
        ));

        info!(url, volume, was_playing, "Announcement starting");
        self.in_flight = Some(Flight {
            id: flight,
            url: url.to_string(),
            was_playing,
            pid,
            task,
        });
        PlayOutcome::Started { flight }
    }

    /// Close out a flight and bring the music back if wanted
    pub async fn finish(
        &mut self,
        flight: u64,
        primary: &mut PlayerProcess,
        resume_music: bool,
    ) -> FinishOutcome {
        if !self.in_flight.as_ref().is_some_and(|f| f.id == flight) {
            return FinishOutcome::Stale;
        }
        let Some(done) = self.in_flight.take() else {
            return FinishOutcome::Stale;
        };

        if !done.was_playing || !resume_music {
            return FinishOutcome::LeftStopped;
        }

        match primary.resume().await {
            ResumeOutcome::Continued => FinishOutcome::Resumed,
            ResumeOutcome::Failed | ResumeOutcome::NoProcess => FinishOutcome::NeedsRestart,
        }
    }

    /// Abort the in-flight announcement, killing its renderer
    pub async fn cancel(&mut self) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        flight.task.abort();
        let pid = flight.pid.load(Ordering::Acquire);
        if pid != 0 {
            if let Err(e) = self.launcher.signal(pid, ProcessSignal::Kill).await {
                warn!(pid, error = %e, "Failed to kill announcement renderer");
            }
        }
        debug!(url = %flight.url, "Announcement cancelled");
    }
}

async fn render(
    launcher: Arc<dyn ProcessLauncher>,
    events: mpsc::UnboundedSender<AnnouncementEvent>,
    settle_delay: Duration,
    flight: u64,
    request: RenderRequest,
    pid_slot: Arc<AtomicU32>,
) {
    tokio::time::sleep(settle_delay).await;

    let outcome = match launcher.spawn(&request).await {
        Ok(spawned) => {
            pid_slot.store(spawned.pid, Ordering::Release);
            Ok(spawned.exited.await.unwrap_or(None))
        }
        Err(e) => {
            warn!(url = %request.url, error = %e, "Announcement renderer failed to start");
            Err(e.to_string())
        }
    };

    let _ = events.send(AnnouncementEvent::Finished {
        flight,
        url: request.url,
        outcome,
    });
}
