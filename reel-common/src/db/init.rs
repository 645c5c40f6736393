//! Database initialization
//!
//! Creates the database on first run with the default schema. All
//! schema statements are idempotent (CREATE TABLE IF NOT EXISTS), so
//! init is safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys (membership rows cascade with their unit)
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while a recompute commit is writing
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests. Single connection: each connection to
/// `sqlite::memory:` is a distinct database.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent)
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_sessions_table(pool).await?;
    create_work_units_table(pool).await?;
    create_work_unit_sessions_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the sessions table
///
/// Written by the transcript ingester; read-only to the correlation
/// service. Timestamps are RFC 3339 TEXT, files_touched is a JSON array.
pub async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            agent TEXT NOT NULL DEFAULT 'unknown',
            model TEXT,
            project_path TEXT NOT NULL DEFAULT '',
            cwd TEXT NOT NULL DEFAULT '',
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            frame_count INTEGER NOT NULL DEFAULT 0,
            files_touched TEXT NOT NULL DEFAULT '[]',
            first_user_message TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (frame_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_project_path ON sessions(project_path)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the work_units table
pub async fn create_work_units_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_units (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            project_path TEXT NOT NULL DEFAULT '',
            confidence TEXT NOT NULL CHECK (confidence IN ('high', 'medium', 'low')),
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            total_duration_seconds INTEGER NOT NULL DEFAULT 0,
            total_frames INTEGER NOT NULL DEFAULT 0,
            files_touched TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (total_duration_seconds >= 0),
            CHECK (total_frames >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_work_units_confidence ON work_units(confidence)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_work_units_project_path ON work_units(project_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the work_unit_sessions table
///
/// The UNIQUE constraint on session_id enforces at-most-one membership
/// per session at the schema level.
pub async fn create_work_unit_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_unit_sessions (
            work_unit_id TEXT NOT NULL REFERENCES work_units(id) ON DELETE CASCADE,
            session_id TEXT NOT NULL UNIQUE,
            agent TEXT NOT NULL DEFAULT 'unknown',
            model TEXT,
            correlation_score REAL NOT NULL DEFAULT 0.0,
            join_reasons TEXT NOT NULL DEFAULT '[]',
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            frame_count INTEGER NOT NULL DEFAULT 0,
            first_user_message TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (work_unit_id, session_id),
            CHECK (correlation_score >= 0.0 AND correlation_score <= 1.0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_wus_work_unit ON work_unit_sessions(work_unit_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_wus_agent ON work_unit_sessions(agent)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Correlation weights and thresholds are tunable; defaults here, the
/// service reads them once at startup.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Scoring weights (sum to 1.0)
    ensure_setting(pool, "wu_weight_path_match", "0.35").await?;
    ensure_setting(pool, "wu_weight_file_overlap", "0.30").await?;
    ensure_setting(pool, "wu_weight_time_proximity", "0.25").await?;
    ensure_setting(pool, "wu_weight_cwd_match", "0.10").await?;

    // Per-signal trigger thresholds for join reasons
    ensure_setting(pool, "wu_trigger_file_overlap", "0.2").await?;
    ensure_setting(pool, "wu_trigger_time_proximity", "0.5").await?;

    // Time proximity decays to 0 at this horizon (4 hours)
    ensure_setting(pool, "wu_time_horizon_seconds", "14400").await?;

    // Confidence tier cutoffs
    ensure_setting(pool, "wu_high_threshold", "0.7").await?;
    ensure_setting(pool, "wu_medium_threshold", "0.4").await?;

    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        tracing::warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Read a setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Write a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
