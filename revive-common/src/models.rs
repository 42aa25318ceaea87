//! Document models
//!
//! Field names follow the remote store's camelCase document layout, so the
//! same types deserialize straight from change-feed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Default announcement cadence when a group does not specify one
pub const DEFAULT_ANNOUNCEMENT_INTERVAL_MIN: u32 = 15;

/// Default announcement volume (percent)
pub const DEFAULT_ANNOUNCEMENT_VOLUME: u8 = 100;

fn default_volume() -> u8 {
    100
}

/// Reported device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Online,
    Playing,
    Paused,
    Stopped,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Playing => "playing",
            DeviceStatus::Paused => "paused",
            DeviceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(DeviceStatus::Online),
            "playing" => Ok(DeviceStatus::Playing),
            "paused" => Ok(DeviceStatus::Paused),
            "stopped" => Ok(DeviceStatus::Stopped),
            other => Err(Error::InvalidInput(format!("unknown device status '{}'", other))),
        }
    }
}

/// A speaker device record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// New device with no group and full volume
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group_id: None,
            volume: default_volume(),
            stream_url: None,
            status: DeviceStatus::Online,
            is_playing: false,
            current_url: None,
            last_seen: None,
        }
    }

    /// Group reference, treating an empty string as absent
    pub fn group_ref(&self) -> Option<&str> {
        self.group_id.as_deref().filter(|g| !g.is_empty())
    }

    /// Stream URL, treating an empty string as absent
    pub fn stream_ref(&self) -> Option<&str> {
        self.stream_url.as_deref().filter(|u| !u.is_empty())
    }
}

/// Partial device update written by the agent
///
/// `None` fields are left untouched. `current_url: Some(None)` clears the
/// stored URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub status: Option<DeviceStatus>,
    pub is_playing: Option<bool>,
    pub current_url: Option<Option<String>>,
    pub volume: Option<u8>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl DevicePatch {
    pub fn volume(volume: u8) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }

    pub fn status(status: DeviceStatus, is_playing: bool) -> Self {
        Self {
            status: Some(status),
            is_playing: Some(is_playing),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, device: &mut Device) {
        if let Some(status) = self.status {
            device.status = status;
        }
        if let Some(is_playing) = self.is_playing {
            device.is_playing = is_playing;
        }
        if let Some(url) = &self.current_url {
            device.current_url = url.clone();
        }
        if let Some(volume) = self.volume {
            device.volume = volume;
        }
        if let Some(seen) = self.last_seen {
            device.last_seen = Some(seen);
        }
    }
}

/// `{url}` entry used by playlists and announcement lists
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A device group: what to play and which announcements to interleave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub local_files: Vec<MediaRef>,
    #[serde(default)]
    pub announcements: Vec<MediaRef>,
    /// Minutes between announcements
    #[serde(default)]
    pub announcement_interval: Option<u32>,
    #[serde(default)]
    pub announcement_volume: Option<u8>,
}

impl Group {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            stream_url: None,
            local_files: Vec::new(),
            announcements: Vec::new(),
            announcement_interval: None,
            announcement_volume: None,
        }
    }

    /// Playlist mode: the group supplies an ordered local-file sequence
    pub fn is_playlist(&self) -> bool {
        !self.local_files.is_empty()
    }

    /// What this group asks the device to play, if anything
    ///
    /// A non-empty playlist wins over a single stream URL.
    pub fn playback_target(&self) -> Option<PlaybackTarget> {
        if self.is_playlist() {
            return Some(PlaybackTarget::Playlist(
                self.local_files.iter().map(|f| f.url.clone()).collect(),
            ));
        }
        self.stream_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| PlaybackTarget::Stream(u.to_string()))
    }

    pub fn announcement_interval_minutes(&self) -> u32 {
        match self.announcement_interval {
            Some(minutes) if minutes > 0 => minutes,
            _ => DEFAULT_ANNOUNCEMENT_INTERVAL_MIN,
        }
    }

    pub fn announcement_volume(&self) -> u8 {
        self.announcement_volume
            .unwrap_or(DEFAULT_ANNOUNCEMENT_VOLUME)
            .min(100)
    }
}

/// Resolved playback target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "urls", rename_all = "lowercase")]
pub enum PlaybackTarget {
    Stream(String),
    Playlist(Vec<String>),
}

/// A remote command as stored (wire form)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub device_id: String,
    pub action: String,
    #[serde(default, alias = "streamUrl")]
    pub url: Option<String>,
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Administrative update flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// System package upgrade only
    System,
    /// Package upgrade, source sync, then reboot
    Full,
}

/// Validated command action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Play { url: Option<String> },
    /// `pause` and `stop` both halt without losing position
    Pause,
    Resume,
    Volume(u8),
    Update(UpdateKind),
    Restart,
}

impl Command {
    /// Validate the wire action into a [`CommandKind`]
    ///
    /// A volume command without a payload means full volume; payloads are
    /// clamped to 0-100.
    pub fn kind(&self) -> Result<CommandKind> {
        match self.action.trim() {
            "play" => Ok(CommandKind::Play {
                url: self.url.clone().filter(|u| !u.is_empty()),
            }),
            "pause" | "stop" => Ok(CommandKind::Pause),
            "resume" => Ok(CommandKind::Resume),
            "volume" => {
                let volume = self.volume.unwrap_or(100).clamp(0, 100) as u8;
                Ok(CommandKind::Volume(volume))
            }
            "update_system" | "system_update" | "update" => Ok(CommandKind::Update(UpdateKind::System)),
            "full_update" => Ok(CommandKind::Update(UpdateKind::Full)),
            "restart_device" | "restart" | "reboot" => Ok(CommandKind::Restart),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

/// Progress status of a long-running administrative action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Starting => "starting",
            ProgressStatus::Running => "running",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProgressStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "starting" => Ok(ProgressStatus::Starting),
            "running" => Ok(ProgressStatus::Running),
            "completed" => Ok(ProgressStatus::Completed),
            "failed" => Ok(ProgressStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown progress status '{}'", other))),
        }
    }
}

/// Progress record, keyed by (device, action)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub action: String,
    pub progress: u8,
    pub status: ProgressStatus,
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
