//! Playback state owned by the controller
//!
//! All transitions are methods on [`PlaybackState`]; the controller never
//! assigns the phase directly. Every transition bumps `transition`, which
//! invalidates delayed restarts scheduled under the old state.

use revive_common::models::DeviceStatus;
use serde::Serialize;
use tracing::debug;

/// Controller lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    /// Spawn in progress or restart pending; doubles as the start lock
    Starting,
    Playing,
    Paused,
    Stopping,
    /// Gave up starting; behaves like Idle for new requests
    Error,
}

impl PlaybackPhase {
    /// Playback is underway or held by the user
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackPhase::Starting | PlaybackPhase::Playing | PlaybackPhase::Paused
        )
    }
}

/// Ordered local files played round-robin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    files: Vec<String>,
    index: usize,
}

impl Playlist {
    /// `None` for an empty list
    pub fn new(files: Vec<String>) -> Option<Self> {
        if files.is_empty() {
            None
        } else {
            Some(Self { files, index: 0 })
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &str {
        &self.files[self.index]
    }

    /// Position of a finished file, matched on file name
    ///
    /// The current position wins when the same name appears more than once.
    pub fn position_of(&self, finished: &str) -> Option<usize> {
        let name = file_name(finished);
        if file_name(self.current()) == name {
            return Some(self.index);
        }
        self.files.iter().position(|f| file_name(f) == name)
    }

    /// Step past `finished`, wrapping to the start; `None` when unmatched
    pub fn advance_after(&mut self, finished: &str) -> Option<&str> {
        let position = self.position_of(finished)?;
        self.index = (position + 1) % self.files.len();
        Some(self.current())
    }
}

/// Last path segment, ignoring any query or fragment
fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Observable view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub phase: PlaybackPhase,
    pub current_url: Option<String>,
    pub playlist_index: Option<usize>,
    pub playlist_len: Option<usize>,
    pub announcement_url: Option<String>,
    pub start_failures: u32,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    pub fn in_playlist(&self) -> bool {
        self.playlist_len.is_some()
    }

    /// Status reported in heartbeats
    pub fn device_status(&self) -> DeviceStatus {
        match self.phase {
            PlaybackPhase::Playing => DeviceStatus::Playing,
            PlaybackPhase::Paused => DeviceStatus::Paused,
            _ => DeviceStatus::Online,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub current_url: Option<String>,
    pub playlist: Option<Playlist>,
    /// Where playback picks up after a pause or a lost process
    pub resume_url: Option<String>,
    pub start_failures: u32,
    pub last_scheduled_group_id: Option<String>,
    pub transition: u64,
}

impl PlaybackState {
    fn enter(&mut self, phase: PlaybackPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Playback phase change");
        }
        self.phase = phase;
        self.transition += 1;
    }

    pub fn is_playlist(&self) -> bool {
        self.playlist.is_some()
    }

    pub fn begin_start(&mut self, url: &str) {
        self.current_url = Some(url.to_string());
        self.enter(PlaybackPhase::Starting);
    }

    pub fn mark_playing(&mut self) {
        self.start_failures = 0;
        self.resume_url = self.current_url.clone();
        self.enter(PlaybackPhase::Playing);
    }

    pub fn mark_paused(&mut self) {
        if self.current_url.is_some() {
            self.resume_url = self.current_url.clone();
        }
        self.enter(PlaybackPhase::Paused);
    }

    pub fn mark_stopping(&mut self) {
        self.enter(PlaybackPhase::Stopping);
    }

    /// Count a renderer that died before it was verified
    pub fn record_failed_start(&mut self) -> u32 {
        self.start_failures += 1;
        self.start_failures
    }

    /// Forget the target entirely
    pub fn mark_idle(&mut self) {
        self.current_url = None;
        self.playlist = None;
        self.resume_url = None;
        self.start_failures = 0;
        self.enter(PlaybackPhase::Idle);
    }

    /// Stop trying but remember the target for a later resume
    pub fn mark_error(&mut self) {
        if self.current_url.is_some() {
            self.resume_url = self.current_url.clone();
        }
        self.start_failures = 0;
        self.enter(PlaybackPhase::Error);
    }

    pub fn snapshot(&self, announcement_url: Option<&str>) -> PlaybackSnapshot {
        PlaybackSnapshot {
            phase: self.phase,
            current_url: self.current_url.clone(),
            playlist_index: self.playlist.as_ref().map(Playlist::index),
            playlist_len: self.playlist.as_ref().map(|p| p.files().len()),
            announcement_url: announcement_url.map(str::to_string),
            start_failures: self.start_failures,
        }
    }
}
