//! Session store reads
//!
//! Sessions are immutable records produced by the transcript ingester.
//! Agent strings and file lists are validated at this boundary:
//! unrecognized agents decode to `unknown`, malformed JSON columns fail
//! the row rather than poisoning the grouping pass.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use reel_common::model::{Agent, Session};
use reel_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const SESSION_COLUMNS: &str = "session_id, agent, model, project_path, cwd, start_time, end_time, \
                               frame_count, files_touched, first_user_message";

/// Load every session, ordered by (start_time, session_id) so callers
/// observe the grouping engine's processing order.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Session>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sessions ORDER BY start_time, session_id",
        SESSION_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_session).collect()
}

/// Load a single session by id
pub async fn get(pool: &SqlitePool, session_id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM sessions WHERE session_id = ?",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Load the given sessions (missing ids are silently absent)
pub async fn list_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<Session>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM sessions WHERE session_id IN ({}) ORDER BY start_time, session_id",
        SESSION_COLUMNS, placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_session).collect()
}

/// Fingerprint of the session corpus, used to detect whether anything
/// changed since the last committed recompute. Sessions are immutable,
/// so count + sorted ids + latest end time identifies the corpus.
pub async fn corpus_fingerprint(pool: &SqlitePool) -> Result<String> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT session_id, end_time FROM sessions ORDER BY session_id")
            .fetch_all(pool)
            .await?;

    let mut hasher = Sha256::new();
    hasher.update(rows.len().to_le_bytes());
    let mut max_end = "";
    for (id, end) in &rows {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        if end.as_str() > max_end {
            max_end = end;
        }
    }
    hasher.update(max_end.as_bytes());

    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Decode one session row, validating enums and JSON columns.
pub(crate) fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let agent: String = row.try_get("agent").map_err(Error::Database)?;
    let files_json: String = row.try_get("files_touched").map_err(Error::Database)?;
    let files_touched: BTreeSet<String> = serde_json::from_str::<Vec<String>>(&files_json)
        .map_err(|e| Error::Internal(format!("Invalid files_touched JSON: {}", e)))?
        .into_iter()
        .collect();

    let start_time: String = row.try_get("start_time").map_err(Error::Database)?;
    let end_time: String = row.try_get("end_time").map_err(Error::Database)?;

    Ok(Session {
        session_id: row.try_get("session_id").map_err(Error::Database)?,
        agent: Agent::from_db_str(&agent),
        model: row.try_get("model").map_err(Error::Database)?,
        project_path: row.try_get("project_path").map_err(Error::Database)?,
        cwd: row.try_get("cwd").map_err(Error::Database)?,
        start_time: parse_timestamp(&start_time)?,
        end_time: parse_timestamp(&end_time)?,
        frame_count: row.try_get("frame_count").map_err(Error::Database)?,
        files_touched,
        first_user_message: row.try_get("first_user_message").map_err(Error::Database)?,
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", s, e)))
}
