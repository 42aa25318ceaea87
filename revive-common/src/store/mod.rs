//! Store abstractions over the remote change-feed document store
//!
//! The agent only depends on these traits. Subscriptions are exposed as
//! streams that never end while the store is alive; transient read errors
//! are logged and retried inside the implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::{Command, Device, DevicePatch, Group, Progress};
use crate::Result;

pub mod memory;
#[cfg(feature = "sqlx")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlx")]
pub use sqlite::SqliteStore;

/// Subscription to a stream of document snapshots
pub type ChangeStream<T> = BoxStream<'static, T>;

/// Change notification for a group document
#[derive(Debug, Clone, PartialEq)]
pub enum GroupChange {
    Updated(Group),
    Removed(String),
}

impl GroupChange {
    pub fn group_id(&self) -> &str {
        match self {
            GroupChange::Updated(group) => &group.id,
            GroupChange::Removed(id) => id,
        }
    }
}

/// Device and group configuration
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn device(&self, id: &str) -> Result<Option<Device>>;

    async fn group(&self, id: &str) -> Result<Option<Group>>;

    /// Write agent-owned device fields (status, volume, liveness)
    async fn patch_device(&self, id: &str, patch: DevicePatch) -> Result<()>;

    /// Remove a dangling group reference (clears groupId and streamUrl)
    async fn clear_group_reference(&self, device_id: &str) -> Result<()>;

    /// Current snapshot (`None` when absent), then one snapshot per change
    fn watch_device(&self, id: &str) -> ChangeStream<Option<Device>>;

    /// Changes to any group after subscription
    fn watch_groups(&self) -> ChangeStream<GroupChange>;
}

/// Per-device remote command feed
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Pending commands at subscription time, then newly added ones
    fn watch_commands(&self, device_id: &str) -> ChangeStream<Command>;

    async fn mark_processed(&self, command_id: &str) -> Result<()>;
}

/// Progress reporting for long-running administrative actions
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn write_progress(&self, device_id: &str, progress: &Progress) -> Result<()>;
}
