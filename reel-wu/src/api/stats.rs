//! Statistics endpoint

use axum::{extract::State, Json};

use crate::error::ApiResult;
use crate::stats::{self, WorkUnitStats};
use crate::AppState;

/// GET /work-units/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<WorkUnitStats>> {
    let stats = stats::collect(&state.db).await?;
    Ok(Json(stats))
}
