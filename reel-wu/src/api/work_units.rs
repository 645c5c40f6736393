//! Work unit CRUD handlers
//!
//! Manual membership edits (add/remove) take the store-write lock so
//! they serialize against an in-flight recompute commit. An added
//! session is pinned with a `manual_override` join reason and survives
//! later recomputes in its assigned unit.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use reel_common::model::{
    Agent, Confidence, JoinReason, Session, WorkUnit, WorkUnitSession,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::{extract_signals, rebuild_unit, score_pair, CorrelationProfile};
use crate::db::{sessions, work_units};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 500;

/// Query parameters for GET /work-units
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub confidence: Option<String>,
    pub agent: Option<String>,
    pub project: Option<String>,
    #[serde(default)]
    pub include_ungrouped: bool,
}

/// Session summary appended when `include_ungrouped=true`
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub agent: Agent,
    pub model: Option<String>,
    pub project_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frame_count: i64,
    pub first_user_message: Option<String>,
}

impl SessionSummary {
    fn from_session(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            agent: session.agent,
            model: session.model,
            project_path: session.project_path,
            start_time: session.start_time,
            end_time: session.end_time,
            frame_count: session.frame_count,
            first_user_message: session.first_user_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkUnitListResponse {
    pub work_units: Vec<WorkUnit>,
    pub total: i64,
    pub ungrouped_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ungrouped_sessions: Option<Vec<SessionSummary>>,
}

/// GET /work-units
///
/// Paginated list, newest first. Filters combine with AND; invalid
/// filter values are rejected rather than silently matching nothing.
pub async fn list_work_units(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<WorkUnitListResponse>> {
    let offset = query.offset.unwrap_or(0).max(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let confidence = query
        .confidence
        .as_deref()
        .map(|s| {
            Confidence::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid confidence filter '{}'", s)))
        })
        .transpose()?;
    let agent = query
        .agent
        .as_deref()
        .map(|s| {
            Agent::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid agent filter '{}'", s)))
        })
        .transpose()?;

    let filter = work_units::ListFilter {
        confidence,
        agent,
        project: query.project.clone(),
    };

    let (units, total) = work_units::list_units(&state.db, &filter, offset, limit).await?;
    let ungrouped_count = work_units::ungrouped_count(&state.db).await?;

    let ungrouped_sessions = if query.include_ungrouped {
        let ungrouped = work_units::ungrouped_sessions(&state.db).await?;
        Some(
            ungrouped
                .into_iter()
                .map(SessionSummary::from_session)
                .collect(),
        )
    } else {
        None
    };

    Ok(Json(WorkUnitListResponse {
        work_units: units,
        total,
        ungrouped_count,
        ungrouped_sessions,
    }))
}

/// GET /work-units/:id
pub async fn get_work_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkUnit>> {
    let id = parse_unit_id(&id)?;
    let unit = work_units::get_unit(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Work unit {} not found", id)))?;
    Ok(Json(unit))
}

/// GET /sessions/:id/work-unit
pub async fn get_work_unit_for_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<WorkUnit>> {
    let unit = work_units::get_unit_for_session(&state.db, &session_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Session {} is not in any work unit", session_id))
        })?;
    Ok(Json(unit))
}

/// Membership edit request for PATCH /work-units/:id
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PatchRequest {
    Add { session_id: String },
    Remove { session_id: String },
}

/// PATCH /work-units/:id
///
/// Adds or removes one session. Add detaches the session from its
/// previous unit first (deleting that unit if it empties) and pins the
/// new membership with `manual_override`. Remove refuses to empty a
/// unit; callers must delete it instead.
pub async fn patch_work_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PatchRequest>,
) -> ApiResult<Json<WorkUnit>> {
    let id = parse_unit_id(&id)?;
    let _write = state.store_write.lock().await;

    match request {
        PatchRequest::Add { session_id } => add_session(&state, id, &session_id).await,
        PatchRequest::Remove { session_id } => remove_session(&state, id, &session_id).await,
    }
}

async fn add_session(state: &AppState, id: Uuid, session_id: &str) -> ApiResult<Json<WorkUnit>> {
    let unit = work_units::get_unit(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Work unit {} not found", id)))?;

    // Idempotent: adding an existing member is a no-op
    if unit.contains_session(session_id) {
        return Ok(Json(unit));
    }

    let session = sessions::get(&state.db, session_id)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidSessionReference(format!("Session {} does not exist", session_id))
        })?;

    // Detach from the previous unit; a unit emptied by the move is
    // deleted rather than persisted with zero members.
    if let Some(previous) = work_units::get_unit_for_session(&state.db, session_id).await? {
        let remaining: Vec<WorkUnitSession> = previous
            .sessions
            .iter()
            .filter(|m| m.session_id != session_id)
            .cloned()
            .collect();
        if remaining.is_empty() {
            work_units::delete_unit(&state.db, previous.id).await?;
            tracing::info!(
                work_unit_id = %previous.id,
                session_id = %session_id,
                "Deleted work unit emptied by manual move"
            );
        } else {
            let rebuilt = rebuild_members(state, previous.id, previous.created_at, remaining).await?;
            work_units::save_unit(&state.db, &rebuilt).await?;
        }
    }

    // Score against the unit aggregate so the membership record shows
    // how well the session actually fits its new home.
    let profile = CorrelationProfile::from_unit(&unit);
    let signals = extract_signals(
        &CorrelationProfile::from_session(&session),
        &profile,
        state.config.time_horizon_seconds,
    );
    let pair = score_pair(&signals, &state.config);
    let mut reasons = pair.reasons;
    reasons.push(JoinReason::ManualOverride);

    let mut members = unit.sessions.clone();
    members.push(WorkUnitSession::from_session(&session, pair.score, reasons));

    let rebuilt = rebuild_members(state, unit.id, unit.created_at, members).await?;
    work_units::save_unit(&state.db, &rebuilt).await?;
    tracing::info!(
        work_unit_id = %unit.id,
        session_id = %session_id,
        "Manually added session to work unit"
    );
    Ok(Json(rebuilt))
}

async fn remove_session(
    state: &AppState,
    id: Uuid,
    session_id: &str,
) -> ApiResult<Json<WorkUnit>> {
    let unit = work_units::get_unit(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Work unit {} not found", id)))?;

    if !unit.contains_session(session_id) {
        return Err(ApiError::NotFound(format!(
            "Session {} is not a member of work unit {}",
            session_id, id
        )));
    }
    if unit.sessions.len() == 1 {
        return Err(ApiError::LastMember(id.to_string()));
    }

    let remaining: Vec<WorkUnitSession> = unit
        .sessions
        .iter()
        .filter(|m| m.session_id != session_id)
        .cloned()
        .collect();
    let rebuilt = rebuild_members(state, unit.id, unit.created_at, remaining).await?;
    work_units::save_unit(&state.db, &rebuilt).await?;
    tracing::info!(
        work_unit_id = %unit.id,
        session_id = %session_id,
        "Manually removed session from work unit"
    );
    Ok(Json(rebuilt))
}

/// DELETE /work-units/:id
///
/// Deletes the unit and its memberships; member sessions become
/// ungrouped until the next recompute.
pub async fn delete_work_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_unit_id(&id)?;
    let _write = state.store_write.lock().await;

    if !work_units::delete_unit(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("Work unit {} not found", id)));
    }
    tracing::info!(work_unit_id = %id, "Deleted work unit");
    Ok(StatusCode::NO_CONTENT)
}

/// Recompute a unit's derived fields from an edited member list.
async fn rebuild_members(
    state: &AppState,
    id: Uuid,
    created_at: DateTime<Utc>,
    members: Vec<WorkUnitSession>,
) -> ApiResult<WorkUnit> {
    let ids: Vec<String> = members.iter().map(|m| m.session_id.clone()).collect();
    let member_sessions = sessions::list_by_ids(&state.db, &ids).await?;
    Ok(rebuild_unit(
        id,
        created_at,
        members,
        &member_sessions,
        &state.config,
        Utc::now(),
    ))
}

fn parse_unit_id(s: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(s)
        .map_err(|_| ApiError::BadRequest(format!("Invalid work unit id '{}'", s)))
}
