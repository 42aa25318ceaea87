//! # Radio Revive Common Library
//!
//! Shared code for the Radio Revive device agent and its tooling:
//! - Document models (Device, Group, Command, Progress)
//! - Store abstractions over the remote change-feed document store
//! - In-memory and SQLite-backed store implementations
//! - Error type and time helpers

#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    Command, CommandKind, Device, DevicePatch, DeviceStatus, Group, MediaRef, PlaybackTarget,
    Progress, ProgressStatus, UpdateKind,
};
pub use store::{ChangeStream, CommandSource, ConfigSource, GroupChange, ProgressSink};
