//! Database initialization
//!
//! Opens (or creates) the identity store and brings the schema up to date.
//! Every statement is `CREATE ... IF NOT EXISTS`, so this is safe to run on
//! each startup.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path, config: &DatabaseConfig) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go through the connect options so that every pooled
    // connection gets them, not just the first one.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    info!(
        "Database busy timeout set to {} ms",
        config.busy_timeout_ms
    );

    Ok(pool)
}

/// Create all identity store tables
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_track_table(pool).await?;
    create_fingerprint_table(pool).await?;
    create_track_mbid_table(pool).await?;
    create_track_puid_table(pool).await?;
    create_foreignid_vendor_table(pool).await?;
    create_foreignid_table(pool).await?;
    create_track_foreignid_table(pool).await?;
    create_mbid_redirect_table(pool).await?;
    create_task_queue_table(pool).await?;
    create_stats_table(pool).await?;
    Ok(())
}

async fn create_track_table(pool: &SqlitePool) -> Result<()> {
    // AUTOINCREMENT: ids of merged-away tracks must never come back
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_fingerprint_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprint (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES track(id),
            fingerprint BLOB NOT NULL,
            created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS fingerprint_idx_track_id ON fingerprint(track_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_track_mbid_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_mbid (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES track(id),
            mbid TEXT NOT NULL,
            submission_count INTEGER NOT NULL DEFAULT 1 CHECK (submission_count >= 1),
            created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (track_id, mbid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS track_mbid_idx_mbid ON track_mbid(mbid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_track_puid_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_puid (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES track(id),
            puid TEXT NOT NULL,
            submission_count INTEGER NOT NULL DEFAULT 1 CHECK (submission_count >= 1),
            created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (track_id, puid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS track_puid_idx_puid ON track_puid(puid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_foreignid_vendor_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS foreignid_vendor (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_foreignid_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS foreignid (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vendor_id INTEGER NOT NULL REFERENCES foreignid_vendor(id),
            name TEXT NOT NULL,
            UNIQUE (vendor_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_track_foreignid_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_foreignid (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES track(id),
            foreignid_id INTEGER NOT NULL REFERENCES foreignid(id),
            submission_count INTEGER NOT NULL DEFAULT 1 CHECK (submission_count >= 1),
            created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (track_id, foreignid_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_mbid_redirect_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mbid_redirect (
            old_mbid TEXT PRIMARY KEY,
            new_mbid TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_task_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            arguments TEXT NOT NULL DEFAULT '{}',
            enqueued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stats_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stats (
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            value INTEGER NOT NULL,
            PRIMARY KEY (name, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Fresh on-disk database in a temporary directory.
    ///
    /// Keep the `TempDir` alive for as long as the pool is used.
    pub(crate) async fn test_pool() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("fpid.db"), &DatabaseConfig::default())
            .await
            .expect("Failed to initialize database");
        (dir, pool)
    }
}
