//! Cloneable front door to the playback controller

use revive_common::models::{Group, PlaybackTarget};
use tokio::sync::{mpsc, oneshot, watch};

use super::state::PlaybackSnapshot;
use crate::error::{Error, Result};

/// Requests accepted by the controller
#[derive(Debug)]
pub(crate) enum Action {
    /// `None` resumes or restarts the remembered URL
    Play(Option<String>),
    PlayTarget(PlaybackTarget),
    Pause,
    Resume,
    ForceStop,
    ScheduleAnnouncements(Group),
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct Request {
    pub action: Action,
    pub reply: oneshot::Sender<Result<()>>,
}

#[derive(Clone)]
pub struct PlaybackHandle {
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<PlaybackSnapshot>,
}

impl PlaybackHandle {
    pub(crate) fn new(
        requests: mpsc::Sender<Request>,
        snapshot: watch::Receiver<PlaybackSnapshot>,
    ) -> Self {
        Self { requests, snapshot }
    }

    async fn request(&self, action: Action) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request { action, reply })
            .await
            .map_err(|_| Error::ControllerClosed)?;
        response.await.map_err(|_| Error::ControllerClosed)?
    }

    pub async fn play(&self, url: Option<String>) -> Result<()> {
        self.request(Action::Play(url)).await
    }

    pub async fn play_target(&self, target: PlaybackTarget) -> Result<()> {
        self.request(Action::PlayTarget(target)).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Action::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Action::Resume).await
    }

    pub async fn force_stop(&self) -> Result<()> {
        self.request(Action::ForceStop).await
    }

    pub async fn schedule_announcements(&self, group: Group) -> Result<()> {
        self.request(Action::ScheduleAnnouncements(group)).await
    }

    /// Terminate renderers and stop the controller task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Action::Shutdown).await
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot.clone()
    }
}
