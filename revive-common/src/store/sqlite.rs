//! SQLite-backed document store with a polling change feed
//!
//! Every write bumps a per-document `revision` counter. Subscriptions poll
//! revisions at a fixed interval and yield a snapshot whenever one moves,
//! which gives the same "snapshot per change" contract as a push feed.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use super::{ChangeStream, CommandSource, ConfigSource, GroupChange, ProgressSink};
use crate::models::{Command, Device, DevicePatch, Group, MediaRef, Progress};
use crate::{Error, Result};

/// Store over a local SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path, poll_interval: Duration) -> Result<Self> {
        let pool = crate::db::init_database(path).await?;
        Ok(Self::with_pool(pool, poll_interval))
    }

    /// Wrap an existing pool whose schema is already created
    pub fn with_pool(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    /// Create or replace a device (operator write)
    pub async fn upsert_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, group_id, volume, stream_url, status, is_playing, current_url, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                group_id = excluded.group_id,
                volume = excluded.volume,
                stream_url = excluded.stream_url,
                status = excluded.status,
                is_playing = excluded.is_playing,
                current_url = excluded.current_url,
                last_seen = excluded.last_seen,
                revision = devices.revision + 1
            "#,
        )
        .bind(&device.id)
        .bind(&device.group_id)
        .bind(device.volume as i64)
        .bind(&device.stream_url)
        .bind(device.status.as_str())
        .bind(device.is_playing)
        .bind(&device.current_url)
        .bind(device.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create or replace a group (operator write)
    pub async fn upsert_group(&self, group: &Group) -> Result<()> {
        let local_files = serde_json::to_string(&group.local_files)?;
        let announcements = serde_json::to_string(&group.announcements)?;

        sqlx::query(
            r#"
            INSERT INTO groups (id, name, stream_url, local_files, announcements, announcement_interval, announcement_volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                stream_url = excluded.stream_url,
                local_files = excluded.local_files,
                announcements = excluded.announcements,
                announcement_interval = excluded.announcement_interval,
                announcement_volume = excluded.announcement_volume,
                revision = groups.revision + 1
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.stream_url)
        .bind(local_files)
        .bind(announcements)
        .bind(group.announcement_interval.map(i64::from))
        .bind(group.announcement_volume.map(i64::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_group(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append an unprocessed command and return its id
    pub async fn insert_command(
        &self,
        device_id: &str,
        action: &str,
        url: Option<&str>,
        volume: Option<i64>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO commands (id, device_id, action, url, volume, processed, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(device_id)
        .bind(action)
        .bind(url)
        .bind(volume)
        .bind(crate::time::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn command(&self, id: &str) -> Result<Option<Command>> {
        let row = sqlx::query("SELECT * FROM commands WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    pub async fn progress(&self, device_id: &str, action: &str) -> Result<Option<Progress>> {
        let row = sqlx::query("SELECT * FROM progress WHERE device_id = ? AND action = ?")
            .bind(device_id)
            .bind(action)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(progress_from_row).transpose()
    }

    async fn device_with_revision(&self, id: &str) -> Result<Option<(Device, i64)>> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((device_from_row(&row)?, row.try_get("revision")?))),
            None => Ok(None),
        }
    }

    async fn group_revisions(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT id, revision FROM groups")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("revision")?)))
            .collect()
    }

    async fn pending_commands(&self, device_id: &str) -> Result<Vec<Command>> {
        let rows = sqlx::query(
            "SELECT * FROM commands WHERE device_id = ? AND processed = 0 ORDER BY created_at, rowid",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(command_from_row).collect()
    }
}

fn device_from_row(row: &SqliteRow) -> Result<Device> {
    let status: String = row.try_get("status")?;
    let volume: i64 = row.try_get("volume")?;
    Ok(Device {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        volume: volume.clamp(0, 100) as u8,
        stream_url: row.try_get("stream_url")?,
        status: status.parse()?,
        is_playing: row.try_get("is_playing")?,
        current_url: row.try_get("current_url")?,
        last_seen: row.try_get("last_seen")?,
    })
}

fn group_from_row(row: &SqliteRow) -> Result<Group> {
    let local_files: String = row.try_get("local_files")?;
    let announcements: String = row.try_get("announcements")?;
    let interval: Option<i64> = row.try_get("announcement_interval")?;
    let volume: Option<i64> = row.try_get("announcement_volume")?;
    Ok(Group {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        stream_url: row.try_get("stream_url")?,
        local_files: serde_json::from_str::<Vec<MediaRef>>(&local_files)?,
        announcements: serde_json::from_str::<Vec<MediaRef>>(&announcements)?,
        announcement_interval: interval.map(|m| m.clamp(0, u32::MAX as i64) as u32),
        announcement_volume: volume.map(|v| v.clamp(0, 100) as u8),
    })
}

fn command_from_row(row: &SqliteRow) -> Result<Command> {
    Ok(Command {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        action: row.try_get("action")?,
        url: row.try_get("url")?,
        volume: row.try_get("volume")?,
        processed: row.try_get("processed")?,
        created_at: row.try_get("created_at")?,
    })
}

fn progress_from_row(row: &SqliteRow) -> Result<Progress> {
    let status: String = row.try_get("status")?;
    let progress: i64 = row.try_get("progress")?;
    Ok(Progress {
        action: row.try_get("action")?,
        progress: progress.clamp(0, 100) as u8,
        status: status.parse()?,
        current_step: row.try_get("current_step")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ConfigSource for SqliteStore {
    async fn device(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.device_with_revision(id).await?.map(|(device, _)| device))
    }

    async fn group(&self, id: &str) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT * FROM groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn patch_device(&self, id: &str, patch: DevicePatch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                status = COALESCE(?, status),
                is_playing = COALESCE(?, is_playing),
                current_url = CASE WHEN ? THEN ? ELSE current_url END,
                volume = COALESCE(?, volume),
                last_seen = COALESCE(?, last_seen),
                revision = revision + 1
            WHERE id = ?
            "#,
        )
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.is_playing)
        .bind(patch.current_url.is_some())
        .bind(patch.current_url.flatten())
        .bind(patch.volume.map(i64::from))
        .bind(patch.last_seen)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("device {}", id)));
        }
        Ok(())
    }

    async fn clear_group_reference(&self, device_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET group_id = NULL, stream_url = NULL, revision = revision + 1 WHERE id = ?",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("device {}", device_id)));
        }
        Ok(())
    }

    fn watch_device(&self, id: &str) -> ChangeStream<Option<Device>> {
        let store = self.clone();
        let id = id.to_string();

        Box::pin(async_stream::stream! {
            // None until the first successful poll
            let mut last_revision: Option<Option<i64>> = None;
            loop {
                match store.device_with_revision(&id).await {
                    Ok(found) => {
                        let revision = found.as_ref().map(|(_, rev)| *rev);
                        if last_revision != Some(revision) {
                            last_revision = Some(revision);
                            yield found.map(|(device, _)| device);
                        }
                    }
                    Err(e) => warn!(device_id = %id, error = %e, "Device poll failed"),
                }
                tokio::time::sleep(store.poll_interval).await;
            }
        })
    }

    fn watch_groups(&self) -> ChangeStream<GroupChange> {
        let store = self.clone();

        Box::pin(async_stream::stream! {
            let mut known: Option<HashMap<String, i64>> = None;
            loop {
                match store.group_revisions().await {
                    Ok(current) => {
                        if let Some(previous) = known.take() {
                            for (id, revision) in &current {
                                if previous.get(id) == Some(revision) {
                                    continue;
                                }
                                match store.group(id).await {
                                    Ok(Some(group)) => yield GroupChange::Updated(group),
                                    Ok(None) => {}
                                    Err(e) => warn!(group_id = %id, error = %e, "Group read failed"),
                                }
                            }
                            for id in previous.keys() {
                                if !current.contains_key(id) {
                                    yield GroupChange::Removed(id.clone());
                                }
                            }
                        }
                        known = Some(current);
                    }
                    Err(e) => warn!(error = %e, "Group poll failed"),
                }
                tokio::time::sleep(store.poll_interval).await;
            }
        })
    }
}

#[async_trait]
impl CommandSource for SqliteStore {
    fn watch_commands(&self, device_id: &str) -> ChangeStream<Command> {
        let store = self.clone();
        let device_id = device_id.to_string();

        Box::pin(async_stream::stream! {
            let mut seen: HashSet<String> = HashSet::new();
            loop {
                match store.pending_commands(&device_id).await {
                    Ok(pending) => {
                        let pending_ids: HashSet<String> =
                            pending.iter().map(|c| c.id.clone()).collect();
                        for command in pending {
                            if seen.insert(command.id.clone()) {
                                yield command;
                            }
                        }
                        // Processed commands never come back
                        seen.retain(|id| pending_ids.contains(id));
                    }
                    Err(e) => warn!(device_id = %device_id, error = %e, "Command poll failed"),
                }
                tokio::time::sleep(store.poll_interval).await;
            }
        })
    }

    async fn mark_processed(&self, command_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE commands SET processed = 1 WHERE id = ?")
            .bind(command_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("command {}", command_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for SqliteStore {
    async fn write_progress(&self, device_id: &str, progress: &Progress) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO progress (device_id, action, progress, status, current_step, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(device_id, action) DO UPDATE SET
                progress = excluded.progress,
                status = excluded.status,
                current_step = excluded.current_step,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(device_id)
        .bind(&progress.action)
        .bind(progress.progress as i64)
        .bind(progress.status.as_str())
        .bind(&progress.current_step)
        .bind(progress.started_at)
        .bind(progress.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
