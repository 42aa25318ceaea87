//! Database initialization
//!
//! Opens (creating if needed) the SQLite file backing the local document
//! store and creates the schema. Safe to run on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_devices_table(pool).await?;
    create_groups_table(pool).await?;
    create_commands_table(pool).await?;
    create_progress_table(pool).await?;
    Ok(())
}

// No foreign key to groups: dangling group references must be representable.
async fn create_devices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            group_id TEXT,
            volume INTEGER NOT NULL DEFAULT 100 CHECK (volume BETWEEN 0 AND 100),
            stream_url TEXT,
            status TEXT NOT NULL DEFAULT 'online',
            is_playing INTEGER NOT NULL DEFAULT 0,
            current_url TEXT,
            last_seen TIMESTAMP,
            revision INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id TEXT PRIMARY KEY,
            name TEXT,
            stream_url TEXT,
            local_files TEXT NOT NULL DEFAULT '[]',
            announcements TEXT NOT NULL DEFAULT '[]',
            announcement_interval INTEGER,
            announcement_volume INTEGER,
            revision INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_commands_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commands (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            action TEXT NOT NULL,
            url TEXT,
            volume INTEGER,
            processed INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_commands_pending ON commands(device_id, processed, created_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS progress (
            device_id TEXT NOT NULL,
            action TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            current_step TEXT NOT NULL DEFAULT '',
            started_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (device_id, action)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
