//! reel-wu library - Work Unit correlation service
//!
//! Groups recorded agent sessions into work units using heuristic
//! correlation signals. Exposed as a library so integration tests can
//! drive the router directly.

pub mod api;
pub mod correlation;
pub mod db;
pub mod error;
pub mod stats;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::correlation::scorer::CorrelationConfig;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Scoring weights and thresholds, loaded once at startup
    pub config: Arc<CorrelationConfig>,
    /// At-most-one-concurrent-recompute gate. try_lock failure means a
    /// recompute is in flight and the request is rejected with 409.
    pub recompute_gate: Arc<Mutex<()>>,
    /// Serializes all store mutations. Recompute holds this from
    /// snapshot through the atomic commit, so manual edits queue behind
    /// it and can never be dropped by the replace-all swap.
    pub store_write: Arc<Mutex<()>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: CorrelationConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            recompute_gate: Arc::new(Mutex::new(())),
            store_write: Arc::new(Mutex::new(())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/work-units", get(api::list_work_units))
        .route("/work-units/stats", get(api::get_stats))
        .route("/work-units/recompute", post(api::recompute_work_units))
        .route(
            "/work-units/:id",
            get(api::get_work_unit)
                .patch(api::patch_work_unit)
                .delete(api::delete_work_unit),
        )
        .route("/sessions/:id/work-unit", get(api::get_work_unit_for_session))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
