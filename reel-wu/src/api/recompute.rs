//! Full recompute endpoint
//!
//! At most one recompute runs at a time: the gate is try-locked and a
//! second request is rejected with 409 rather than queued. The store
//! write lock is held from snapshot through commit so the pass observes
//! a consistent store and manual edits queue behind it.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::correlation::regroup;
use crate::db::{sessions, work_units};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RecomputeRequest {
    /// Rerun even when the session corpus is unchanged
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct RecomputeResponse {
    pub work_units_created: usize,
    pub work_units_updated: usize,
    pub sessions_processed: usize,
    pub duration_ms: u64,
    /// True when the corpus was unchanged and the pass was skipped
    pub skipped: bool,
}

/// POST /work-units/recompute
pub async fn recompute_work_units(
    State(state): State<AppState>,
    body: Option<Json<RecomputeRequest>>,
) -> ApiResult<Json<RecomputeResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let _gate = state
        .recompute_gate
        .try_lock()
        .map_err(|_| ApiError::RecomputeInProgress)?;
    let started = Instant::now();
    let _write = state.store_write.lock().await;

    let fingerprint = sessions::corpus_fingerprint(&state.db).await?;
    if !request.force {
        let last = work_units::last_recompute_fingerprint(&state.db).await?;
        if last.as_deref() == Some(fingerprint.as_str()) {
            tracing::debug!("Session corpus unchanged since last recompute, skipping");
            return Ok(Json(RecomputeResponse {
                work_units_created: 0,
                work_units_updated: 0,
                sessions_processed: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                skipped: true,
            }));
        }
    }

    let session_rows = sessions::list_all(&state.db).await?;
    let existing = work_units::load_all(&state.db).await?;
    let outcome = regroup(&session_rows, &existing, &state.config, chrono::Utc::now());
    work_units::replace_all(&state.db, &outcome.units, &fingerprint).await?;

    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        sessions = outcome.sessions_processed,
        units = outcome.units.len(),
        created = outcome.created,
        updated = outcome.updated,
        duration_ms,
        "Recompute committed"
    );

    Ok(Json(RecomputeResponse {
        work_units_created: outcome.created,
        work_units_updated: outcome.updated,
        sessions_processed: outcome.sessions_processed,
        duration_ms,
        skipped: false,
    }))
}
