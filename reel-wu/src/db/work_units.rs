//! Work unit store
//!
//! Owns the `work_units` and `work_unit_sessions` tables. Full
//! recompute commits through `replace_all`, a single transaction that
//! swaps the entire unit set and records the session-corpus
//! fingerprint; point mutations go through `save_unit`/`delete_unit`.

use std::collections::BTreeSet;

use reel_common::model::{Agent, Confidence, JoinReason, Session, WorkUnit, WorkUnitSession};
use reel_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::sessions::{parse_timestamp, row_to_session};

/// Settings key recording the corpus fingerprint of the last committed
/// recompute.
pub const LAST_RECOMPUTE_FINGERPRINT_KEY: &str = "wu_last_recompute_fingerprint";

/// Filters for the list endpoint
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub confidence: Option<Confidence>,
    pub agent: Option<Agent>,
    /// Substring match on the representative project path
    pub project: Option<String>,
}

/// List units matching the filter, newest first. Returns the page and
/// the total count of matching units.
pub async fn list_units(
    pool: &SqlitePool,
    filter: &ListFilter,
    offset: i64,
    limit: i64,
) -> Result<(Vec<WorkUnit>, i64)> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(confidence) = filter.confidence {
        where_clauses.push("confidence = ?".to_string());
        binds.push(confidence.as_str().to_string());
    }
    if let Some(agent) = filter.agent {
        where_clauses.push(
            "EXISTS (SELECT 1 FROM work_unit_sessions ws \
             WHERE ws.work_unit_id = work_units.id AND ws.agent = ?)"
                .to_string(),
        );
        binds.push(agent.as_str().to_string());
    }
    if let Some(project) = &filter.project {
        where_clauses.push("project_path LIKE ? ESCAPE '\\'".to_string());
        binds.push(format!("%{}%", escape_like(project)));
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_clauses.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM work_units{}", where_sql);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let total = count_query.fetch_one(pool).await?;

    let page_sql = format!(
        "SELECT id, name, project_path, confidence, start_time, end_time, \
         total_duration_seconds, total_frames, files_touched, created_at, updated_at \
         FROM work_units{} ORDER BY start_time DESC, id LIMIT ? OFFSET ?",
        where_sql
    );
    let mut page_query = sqlx::query(&page_sql);
    for bind in &binds {
        page_query = page_query.bind(bind);
    }
    let rows = page_query.bind(limit).bind(offset).fetch_all(pool).await?;

    let mut units: Vec<WorkUnit> = rows
        .iter()
        .map(row_to_unit_shell)
        .collect::<Result<Vec<_>>>()?;
    attach_memberships(pool, &mut units).await?;
    Ok((units, total))
}

/// Load every unit with memberships (used by recompute snapshots)
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<WorkUnit>> {
    let rows = sqlx::query(
        "SELECT id, name, project_path, confidence, start_time, end_time, \
         total_duration_seconds, total_frames, files_touched, created_at, updated_at \
         FROM work_units ORDER BY start_time, id",
    )
    .fetch_all(pool)
    .await?;

    let mut units: Vec<WorkUnit> = rows
        .iter()
        .map(row_to_unit_shell)
        .collect::<Result<Vec<_>>>()?;
    attach_memberships(pool, &mut units).await?;
    Ok(units)
}

/// Load one unit with its memberships
pub async fn get_unit(pool: &SqlitePool, id: Uuid) -> Result<Option<WorkUnit>> {
    let row = sqlx::query(
        "SELECT id, name, project_path, confidence, start_time, end_time, \
         total_duration_seconds, total_frames, files_touched, created_at, updated_at \
         FROM work_units WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut units = vec![row_to_unit_shell(&row)?];
    attach_memberships(pool, &mut units).await?;
    Ok(units.pop())
}

/// The unit containing a session, if any
pub async fn get_unit_for_session(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Option<WorkUnit>> {
    let unit_id: Option<String> = sqlx::query_scalar(
        "SELECT work_unit_id FROM work_unit_sessions WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    match unit_id {
        Some(id) => {
            let id = parse_unit_id(&id)?;
            get_unit(pool, id).await
        }
        None => Ok(None),
    }
}

/// Atomic replace-all swap used by full recompute. Old state stays
/// visible until commit; the corpus fingerprint is recorded in the
/// same transaction.
pub async fn replace_all(pool: &SqlitePool, units: &[WorkUnit], fingerprint: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM work_unit_sessions")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM work_units")
        .execute(&mut *tx)
        .await?;

    for unit in units {
        insert_unit_tx(&mut tx, unit).await?;
    }

    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(LAST_RECOMPUTE_FINGERPRINT_KEY)
    .bind(fingerprint)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Upsert one unit and its memberships in a single transaction
pub async fn save_unit(pool: &SqlitePool, unit: &WorkUnit) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM work_unit_sessions WHERE work_unit_id = ?")
        .bind(unit.id.to_string())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM work_units WHERE id = ?")
        .bind(unit.id.to_string())
        .execute(&mut *tx)
        .await?;
    insert_unit_tx(&mut tx, unit).await?;
    tx.commit().await?;
    Ok(())
}

/// Delete a unit (memberships cascade). Returns false when absent.
pub async fn delete_unit(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM work_units WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Count of sessions with no membership anywhere
pub async fn ungrouped_count(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions s WHERE NOT EXISTS \
         (SELECT 1 FROM work_unit_sessions ws WHERE ws.session_id = s.session_id)",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Sessions with no membership anywhere, in processing order
pub async fn ungrouped_sessions(pool: &SqlitePool) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        "SELECT session_id, agent, model, project_path, cwd, start_time, end_time, \
         frame_count, files_touched, first_user_message FROM sessions s \
         WHERE NOT EXISTS \
         (SELECT 1 FROM work_unit_sessions ws WHERE ws.session_id = s.session_id) \
         ORDER BY start_time, session_id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_session).collect()
}

/// Fingerprint recorded by the last committed recompute
pub async fn last_recompute_fingerprint(pool: &SqlitePool) -> Result<Option<String>> {
    reel_common::db::get_setting(pool, LAST_RECOMPUTE_FINGERPRINT_KEY).await
}

async fn insert_unit_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    unit: &WorkUnit,
) -> Result<()> {
    let files_json = serde_json::to_string(&unit.files_touched.iter().collect::<Vec<_>>())
        .map_err(|e| Error::Internal(format!("Failed to serialize files_touched: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO work_units (
            id, name, project_path, confidence, start_time, end_time,
            total_duration_seconds, total_frames, files_touched, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(unit.id.to_string())
    .bind(&unit.name)
    .bind(&unit.project_path)
    .bind(unit.confidence.as_str())
    .bind(unit.start_time.to_rfc3339())
    .bind(unit.end_time.to_rfc3339())
    .bind(unit.total_duration_seconds)
    .bind(unit.total_frames)
    .bind(files_json)
    .bind(unit.created_at.to_rfc3339())
    .bind(unit.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    for member in &unit.sessions {
        let reasons_json = serde_json::to_string(&member.join_reasons)
            .map_err(|e| Error::Internal(format!("Failed to serialize join_reasons: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO work_unit_sessions (
                work_unit_id, session_id, agent, model, correlation_score, join_reasons,
                start_time, end_time, duration_seconds, frame_count, first_user_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(unit.id.to_string())
        .bind(&member.session_id)
        .bind(member.agent.as_str())
        .bind(&member.model)
        .bind(member.correlation_score)
        .bind(reasons_json)
        .bind(member.start_time.to_rfc3339())
        .bind(member.end_time.to_rfc3339())
        .bind(member.duration_seconds)
        .bind(member.frame_count)
        .bind(&member.first_user_message)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Attach membership rows to unit shells in one batched query
async fn attach_memberships(pool: &SqlitePool, units: &mut [WorkUnit]) -> Result<()> {
    if units.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; units.len()].join(", ");
    let sql = format!(
        "SELECT work_unit_id, session_id, agent, model, correlation_score, join_reasons, \
         start_time, end_time, duration_seconds, frame_count, first_user_message \
         FROM work_unit_sessions WHERE work_unit_id IN ({}) \
         ORDER BY start_time, session_id",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for unit in units.iter() {
        query = query.bind(unit.id.to_string());
    }
    let rows = query.fetch_all(pool).await?;

    for row in &rows {
        let unit_id: String = row.try_get("work_unit_id").map_err(Error::Database)?;
        let unit_id = parse_unit_id(&unit_id)?;
        let member = row_to_membership(row)?;
        if let Some(unit) = units.iter_mut().find(|u| u.id == unit_id) {
            unit.sessions.push(member);
        }
    }
    for unit in units.iter_mut() {
        derive_agents(unit);
    }
    Ok(())
}

fn row_to_unit_shell(row: &SqliteRow) -> Result<WorkUnit> {
    let id: String = row.try_get("id").map_err(Error::Database)?;
    let confidence: String = row.try_get("confidence").map_err(Error::Database)?;
    let files_json: String = row.try_get("files_touched").map_err(Error::Database)?;
    let files_touched: BTreeSet<String> = serde_json::from_str::<Vec<String>>(&files_json)
        .map_err(|e| Error::Internal(format!("Invalid files_touched JSON: {}", e)))?
        .into_iter()
        .collect();

    let start_time: String = row.try_get("start_time").map_err(Error::Database)?;
    let end_time: String = row.try_get("end_time").map_err(Error::Database)?;
    let created_at: String = row.try_get("created_at").map_err(Error::Database)?;
    let updated_at: String = row.try_get("updated_at").map_err(Error::Database)?;

    Ok(WorkUnit {
        id: parse_unit_id(&id)?,
        name: row.try_get("name").map_err(Error::Database)?,
        project_path: row.try_get("project_path").map_err(Error::Database)?,
        sessions: Vec::new(),
        agents: Vec::new(),
        confidence: Confidence::parse(&confidence)
            .ok_or_else(|| Error::Internal(format!("Invalid confidence '{}'", confidence)))?,
        start_time: parse_timestamp(&start_time)?,
        end_time: parse_timestamp(&end_time)?,
        total_duration_seconds: row
            .try_get("total_duration_seconds")
            .map_err(Error::Database)?,
        total_frames: row.try_get("total_frames").map_err(Error::Database)?,
        files_touched,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_membership(row: &SqliteRow) -> Result<WorkUnitSession> {
    let agent: String = row.try_get("agent").map_err(Error::Database)?;
    let reasons_json: String = row.try_get("join_reasons").map_err(Error::Database)?;
    let join_reasons: Vec<JoinReason> = serde_json::from_str(&reasons_json)
        .map_err(|e| Error::Internal(format!("Invalid join_reasons JSON: {}", e)))?;

    let start_time: String = row.try_get("start_time").map_err(Error::Database)?;
    let end_time: String = row.try_get("end_time").map_err(Error::Database)?;

    Ok(WorkUnitSession {
        session_id: row.try_get("session_id").map_err(Error::Database)?,
        agent: Agent::from_db_str(&agent),
        model: row.try_get("model").map_err(Error::Database)?,
        correlation_score: row.try_get("correlation_score").map_err(Error::Database)?,
        join_reasons,
        start_time: parse_timestamp(&start_time)?,
        end_time: parse_timestamp(&end_time)?,
        duration_seconds: row.try_get("duration_seconds").map_err(Error::Database)?,
        frame_count: row.try_get("frame_count").map_err(Error::Database)?,
        first_user_message: row.try_get("first_user_message").map_err(Error::Database)?,
    })
}

fn parse_unit_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Invalid work unit id '{}': {}", s, e)))
}

/// Escape LIKE wildcards in user-supplied substrings
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// `agents` is derived from memberships, not stored
fn derive_agents(unit: &mut WorkUnit) {
    let mut agents: Vec<Agent> = unit.sessions.iter().map(|m| m.agent).collect();
    agents.sort();
    agents.dedup();
    unit.agents = agents;
}
