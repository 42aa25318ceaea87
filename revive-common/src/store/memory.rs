//! In-process document store with a broadcast change feed
//!
//! Used by tests and by standalone runs without a database. Every write
//! publishes a change notification; subscribers re-read the document on
//! notification, so a lagging subscriber still converges to the latest state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use uuid::Uuid;

use super::{ChangeStream, CommandSource, ConfigSource, GroupChange, ProgressSink};
use crate::models::{Command, Device, DevicePatch, Group, Progress};
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum StoreChange {
    Device(String),
    Group(String),
    Command(String),
}

#[derive(Default)]
struct Documents {
    devices: HashMap<String, Device>,
    groups: HashMap<String, Group>,
    /// Insertion order is delivery order
    commands: Vec<Command>,
    progress: HashMap<(String, String), Progress>,
}

struct Shared {
    docs: Mutex<Documents>,
    changes: broadcast::Sender<StoreChange>,
    group_reads: AtomicU64,
}

/// Cloneable handle to an in-memory store
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                docs: Mutex::new(Documents::default()),
                changes,
                group_reads: AtomicU64::new(0),
            }),
        }
    }

    fn docs(&self) -> MutexGuard<'_, Documents> {
        self.shared.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine
        let _ = self.shared.changes.send(change);
    }

    /// Create or replace a device (operator write)
    pub fn put_device(&self, device: Device) {
        let id = device.id.clone();
        self.docs().devices.insert(id.clone(), device);
        self.publish(StoreChange::Device(id));
    }

    /// Create or replace a group (operator write)
    pub fn put_group(&self, group: Group) {
        let id = group.id.clone();
        self.docs().groups.insert(id.clone(), group);
        self.publish(StoreChange::Group(id));
    }

    /// Delete a group, leaving any device references dangling
    pub fn remove_group(&self, id: &str) {
        self.docs().groups.remove(id);
        self.publish(StoreChange::Group(id.to_string()));
    }

    /// Append an unprocessed command and return its id
    pub fn push_command(
        &self,
        device_id: &str,
        action: &str,
        url: Option<&str>,
        volume: Option<i64>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let command = Command {
            id: id.clone(),
            device_id: device_id.to_string(),
            action: action.to_string(),
            url: url.map(str::to_string),
            volume,
            processed: false,
            created_at: Some(crate::time::now()),
        };
        self.docs().commands.push(command);
        self.publish(StoreChange::Command(id.clone()));
        id
    }

    pub fn device_snapshot(&self, id: &str) -> Option<Device> {
        self.docs().devices.get(id).cloned()
    }

    pub fn command(&self, id: &str) -> Option<Command> {
        self.docs().commands.iter().find(|c| c.id == id).cloned()
    }

    pub fn progress(&self, device_id: &str, action: &str) -> Option<Progress> {
        self.docs()
            .progress
            .get(&(device_id.to_string(), action.to_string()))
            .cloned()
    }

    /// Number of group reads served so far
    pub fn group_reads(&self) -> u64 {
        self.shared.group_reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConfigSource for MemoryStore {
    async fn device(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.device_snapshot(id))
    }

    async fn group(&self, id: &str) -> Result<Option<Group>> {
        self.shared.group_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.docs().groups.get(id).cloned())
    }

    async fn patch_device(&self, id: &str, patch: DevicePatch) -> Result<()> {
        {
            let mut docs = self.docs();
            let device = docs
                .devices
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("device {}", id)))?;
            patch.apply_to(device);
        }
        self.publish(StoreChange::Device(id.to_string()));
        Ok(())
    }

    async fn clear_group_reference(&self, device_id: &str) -> Result<()> {
        {
            let mut docs = self.docs();
            let device = docs
                .devices
                .get_mut(device_id)
                .ok_or_else(|| Error::NotFound(format!("device {}", device_id)))?;
            device.group_id = None;
            device.stream_url = None;
        }
        self.publish(StoreChange::Device(device_id.to_string()));
        Ok(())
    }

    fn watch_device(&self, id: &str) -> ChangeStream<Option<Device>> {
        let store = self.clone();
        let id = id.to_string();
        let mut rx = self.shared.changes.subscribe();
        let initial = self.device_snapshot(&id);

        Box::pin(async_stream::stream! {
            yield initial;
            loop {
                match rx.recv().await {
                    Ok(StoreChange::Device(changed)) if changed == id => {
                        yield store.device_snapshot(&id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Device feed lagged, re-reading");
                        yield store.device_snapshot(&id);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn watch_groups(&self) -> ChangeStream<GroupChange> {
        let store = self.clone();
        let mut rx = self.shared.changes.subscribe();

        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(StoreChange::Group(id)) => {
                        let group = store.docs().groups.get(&id).cloned();
                        yield match group {
                            Some(group) => GroupChange::Updated(group),
                            None => GroupChange::Removed(id),
                        };
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Group feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl CommandSource for MemoryStore {
    fn watch_commands(&self, device_id: &str) -> ChangeStream<Command> {
        let store = self.clone();
        let device_id = device_id.to_string();
        let mut rx = self.shared.changes.subscribe();
        let pending: Vec<Command> = self
            .docs()
            .commands
            .iter()
            .filter(|c| c.device_id == device_id && !c.processed)
            .cloned()
            .collect();

        Box::pin(async_stream::stream! {
            for command in pending {
                yield command;
            }
            loop {
                match rx.recv().await {
                    Ok(StoreChange::Command(id)) => {
                        if let Some(command) = store.command(&id) {
                            if command.device_id == device_id {
                                yield command;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Command feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn mark_processed(&self, command_id: &str) -> Result<()> {
        let mut docs = self.docs();
        let command = docs
            .commands
            .iter_mut()
            .find(|c| c.id == command_id)
            .ok_or_else(|| Error::NotFound(format!("command {}", command_id)))?;
        command.processed = true;
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for MemoryStore {
    async fn write_progress(&self, device_id: &str, progress: &Progress) -> Result<()> {
        self.docs().progress.insert(
            (device_id.to_string(), progress.action.clone()),
            progress.clone(),
        );
        Ok(())
    }
}
