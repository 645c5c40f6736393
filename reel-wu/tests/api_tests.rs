//! Integration tests for reel-wu API endpoints
//!
//! Tests cover:
//! - Health endpoint
//! - Work unit listing with pagination and filters
//! - Full recompute: grouping, idempotence, staleness skip
//! - Manual membership edits (add/remove) and their error taxonomy
//! - Work unit deletion
//! - Statistics aggregation
//! - Session-to-unit lookup

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use reel_common::db::init_in_memory;
use reel_wu::correlation::CorrelationConfig;
use reel_wu::{build_router, AppState};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::util::ServiceExt; // for `oneshot` method

/// Test helper: fresh in-memory database with the full schema
async fn setup_test_db() -> SqlitePool {
    init_in_memory().await.expect("Should create test database")
}

fn setup_app(db: SqlitePool) -> axum::Router {
    let state = AppState::new(db, CorrelationConfig::default());
    build_router(state)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

#[allow(clippy::too_many_arguments)]
async fn seed_session(
    pool: &SqlitePool,
    session_id: &str,
    agent: &str,
    project_path: &str,
    start_time: &str,
    end_time: &str,
    files: &[&str],
    frame_count: i64,
) {
    let files_json = serde_json::to_string(files).unwrap();
    sqlx::query(
        "INSERT INTO sessions (session_id, agent, model, project_path, cwd, start_time, \
         end_time, frame_count, files_touched, first_user_message) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(agent)
    .bind("test-model")
    .bind(project_path)
    .bind(project_path)
    .bind(start_time)
    .bind(end_time)
    .bind(frame_count)
    .bind(files_json)
    .bind("do the thing")
    .execute(pool)
    .await
    .expect("Should insert session");
}

/// Two overlapping sessions on the same project plus one unrelated
/// evening session. Recompute should produce a pair unit and a
/// singleton.
async fn seed_standard_corpus(pool: &SqlitePool) {
    seed_session(
        pool,
        "s-alpha-1",
        "claude",
        "/home/dev/projects/alpha",
        "2026-08-28T10:00:00Z",
        "2026-08-28T10:45:00Z",
        &["src/lib.rs", "src/api.rs"],
        100,
    )
    .await;
    seed_session(
        pool,
        "s-alpha-2",
        "codex",
        "/home/dev/projects/alpha",
        "2026-08-28T10:30:00Z",
        "2026-08-28T11:15:00Z",
        &["src/lib.rs", "src/db.rs"],
        80,
    )
    .await;
    seed_session(
        pool,
        "s-beta-1",
        "gemini",
        "/home/dev/projects/beta",
        "2026-08-28T22:00:00Z",
        "2026-08-28T22:30:00Z",
        &["notes.md"],
        40,
    )
    .await;
}

async fn run_recompute(app: &axum::Router, force: bool) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/work-units/recompute",
            json!({ "force": force }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    extract_json(response.into_body()).await
}

// =============================================================================
// Health endpoint
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let db = setup_test_db().await;
    let app = setup_app(db);

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "reel-wu");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_number());
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_list_empty_store_counts_ungrouped() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);

    let response = app
        .clone()
        .oneshot(get_request("/work-units"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["work_units"].as_array().unwrap().len(), 0);
    assert_eq!(body["total"], 0);
    assert_eq!(body["ungrouped_count"], 3);
    // Not requested, not present
    assert!(body.get("ungrouped_sessions").is_none());

    let response = app
        .oneshot(get_request("/work-units?include_ungrouped=true"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    let ungrouped = body["ungrouped_sessions"].as_array().unwrap();
    assert_eq!(ungrouped.len(), 3);
    // Processing order: (start_time, session_id)
    assert_eq!(ungrouped[0]["session_id"], "s-alpha-1");
    assert_eq!(ungrouped[2]["session_id"], "s-beta-1");
}

#[tokio::test]
async fn test_list_rejects_invalid_filters() {
    let db = setup_test_db().await;
    let app = setup_app(db);

    let response = app
        .clone()
        .oneshot(get_request("/work-units?confidence=certain"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let response = app
        .oneshot(get_request("/work-units?agent=cursor"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_filters_and_pagination() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);
    run_recompute(&app, false).await;

    // Agent filter matches units containing any member of that agent
    let response = app
        .clone()
        .oneshot(get_request("/work-units?agent=claude"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 1);
    let unit = &body["work_units"][0];
    assert!(unit["project_path"]
        .as_str()
        .unwrap()
        .ends_with("projects/alpha"));

    // Project substring filter
    let response = app
        .clone()
        .oneshot(get_request("/work-units?project=beta"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 1);

    // Pagination: page size 1 over 2 units, newest first
    let response = app
        .clone()
        .oneshot(get_request("/work-units?limit=1"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["work_units"].as_array().unwrap().len(), 1);
    let first_id = body["work_units"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request("/work-units?limit=1&offset=1"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["work_units"].as_array().unwrap().len(), 1);
    assert_ne!(body["work_units"][0]["id"].as_str().unwrap(), first_id);
}

#[tokio::test]
async fn test_get_unknown_unit_returns_404() {
    let db = setup_test_db().await;
    let app = setup_app(db);

    let response = app
        .clone()
        .oneshot(get_request(
            "/work-units/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    // Malformed id is a bad request, not a 404
    let response = app
        .oneshot(get_request("/work-units/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Recompute
// =============================================================================

#[tokio::test]
async fn test_recompute_groups_related_sessions() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);

    let body = run_recompute(&app, false).await;
    assert_eq!(body["work_units_created"], 2);
    assert_eq!(body["work_units_updated"], 0);
    assert_eq!(body["sessions_processed"], 3);
    assert_eq!(body["skipped"], false);

    let response = app
        .clone()
        .oneshot(get_request("/work-units?project=alpha"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    let unit = &body["work_units"][0];
    // Same path, overlapping spans, shared files: high confidence pair
    assert_eq!(unit["confidence"], "high");
    assert_eq!(unit["sessions"].as_array().unwrap().len(), 2);
    assert_eq!(unit["agents"], json!(["claude", "codex"]));
    assert_eq!(unit["total_frames"], 180);
    let reasons = unit["sessions"][0]["join_reasons"].as_array().unwrap();
    assert!(reasons.contains(&json!("project_path_match")));
    assert!(reasons.contains(&json!("time_proximity")));

    // Everything is grouped after the pass (the beta session gets a
    // singleton unit)
    let response = app.oneshot(get_request("/work-units")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["ungrouped_count"], 0);
}

#[tokio::test]
async fn test_recompute_is_idempotent_and_skips_unchanged_corpus() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db.clone());

    run_recompute(&app, false).await;
    let response = app
        .clone()
        .oneshot(get_request("/work-units"))
        .await
        .unwrap();
    let before = extract_json(response.into_body()).await;

    // Unchanged corpus: the pass is skipped outright
    let body = run_recompute(&app, false).await;
    assert_eq!(body["skipped"], true);
    assert_eq!(body["work_units_created"], 0);
    assert_eq!(body["work_units_updated"], 0);
    assert_eq!(body["sessions_processed"], 0);

    // Forced rerun recomputes but reproduces the same units
    let body = run_recompute(&app, true).await;
    assert_eq!(body["skipped"], false);
    assert_eq!(body["work_units_created"], 0);
    assert_eq!(body["work_units_updated"], 0);

    let response = app.oneshot(get_request("/work-units")).await.unwrap();
    let after = extract_json(response.into_body()).await;
    let ids = |v: &Value| -> Vec<String> {
        v["work_units"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["id"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(ids(&before), ids(&after));
    assert_eq!(
        before["work_units"][0]["updated_at"],
        after["work_units"][0]["updated_at"]
    );
}

#[tokio::test]
async fn test_recompute_picks_up_new_sessions() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db.clone());
    run_recompute(&app, false).await;

    // New overlapping session on alpha arrives
    seed_session(
        &db,
        "s-alpha-3",
        "claude",
        "/home/dev/projects/alpha",
        "2026-08-28T11:00:00Z",
        "2026-08-28T11:30:00Z",
        &["src/api.rs"],
        60,
    )
    .await;

    let body = run_recompute(&app, false).await;
    assert_eq!(body["skipped"], false);
    assert_eq!(body["sessions_processed"], 4);
    // The alpha unit grows in place; no new unit for the newcomer
    assert_eq!(body["work_units_created"], 0);
    assert_eq!(body["work_units_updated"], 1);

    let response = app
        .oneshot(get_request("/work-units?project=alpha"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["work_units"][0]["sessions"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_recompute_rejected() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let state = AppState::new(db, CorrelationConfig::default());
    let app = build_router(state.clone());

    // Simulate an in-flight recompute by holding the gate
    let _guard = state.recompute_gate.lock().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/work-units/recompute",
            json!({ "force": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "RECOMPUTE_IN_PROGRESS");
}

// =============================================================================
// Manual membership edits
// =============================================================================

async fn unit_id_for_session(app: &axum::Router, session_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/work-unit", session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_patch_add_moves_session_and_pins_it() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);
    run_recompute(&app, false).await;

    let alpha_id = unit_id_for_session(&app, "s-alpha-1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/work-units/{}", alpha_id),
            json!({ "action": "add", "session_id": "s-beta-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 3);
    let moved = body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["session_id"] == "s-beta-1")
        .unwrap();
    assert!(moved["join_reasons"]
        .as_array()
        .unwrap()
        .contains(&json!("manual_override")));

    // The singleton the session came from was emptied and deleted
    let response = app
        .clone()
        .oneshot(get_request("/work-units"))
        .await
        .unwrap();
    let list = extract_json(response.into_body()).await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["ungrouped_count"], 0);

    // A forced recompute keeps the pinned session in its assigned unit
    run_recompute(&app, true).await;
    assert_eq!(unit_id_for_session(&app, "s-beta-1").await, alpha_id);
}

#[tokio::test]
async fn test_patch_add_unknown_session_rejected() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);
    run_recompute(&app, false).await;

    let alpha_id = unit_id_for_session(&app, "s-alpha-1").await;
    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/work-units/{}", alpha_id),
            json!({ "action": "add", "session_id": "no-such-session" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "INVALID_SESSION_REFERENCE");
}

#[tokio::test]
async fn test_patch_remove_and_last_member_guard() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);
    run_recompute(&app, false).await;

    let alpha_id = unit_id_for_session(&app, "s-alpha-1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/work-units/{}", alpha_id),
            json!({ "action": "remove", "session_id": "s-alpha-2" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
    // Aggregates follow the member list
    assert_eq!(body["total_frames"], 100);
    assert_eq!(body["agents"], json!(["claude"]));

    // Removing the final member is refused; the unit is untouched
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/work-units/{}", alpha_id),
            json!({ "action": "remove", "session_id": "s-alpha-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "LAST_MEMBER");

    let response = app
        .oneshot(get_request(&format!("/work-units/{}", alpha_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_patch_remove_nonmember_returns_404() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);
    run_recompute(&app, false).await;

    let alpha_id = unit_id_for_session(&app, "s-alpha-1").await;
    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/work-units/{}", alpha_id),
            json!({ "action": "remove", "session_id": "s-beta-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_delete_unit_ungroups_members() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);
    run_recompute(&app, false).await;

    let alpha_id = unit_id_for_session(&app, "s-alpha-1").await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/work-units/{}", alpha_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/work-units/{}", alpha_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Former members are ungrouped until the next recompute
    let response = app
        .clone()
        .oneshot(get_request("/work-units"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["ungrouped_count"], 2);

    // Deleting again is a 404
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/work-units/{}", alpha_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Statistics
// =============================================================================

#[tokio::test]
async fn test_stats_aggregation() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);

    // Before any recompute: all sessions ungrouped
    let response = app
        .clone()
        .oneshot(get_request("/work-units/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 0);
    assert_eq!(body["ungrouped_sessions"], 3);

    run_recompute(&app, false).await;

    let response = app
        .oneshot(get_request("/work-units/stats"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["ungrouped_sessions"], 0);
    // Pair unit and singleton both clear the high threshold
    assert_eq!(body["by_confidence"]["high"], 2);
    assert_eq!(body["by_confidence"]["medium"], 0);
    assert_eq!(body["by_confidence"]["low"], 0);

    // Units-per-agent: the alpha pair counts for claude and codex,
    // the beta singleton for gemini
    assert_eq!(body["by_agent"]["claude"], 1);
    assert_eq!(body["by_agent"]["codex"], 1);
    assert_eq!(body["by_agent"]["gemini"], 1);
}

// =============================================================================
// Session-to-unit lookup
// =============================================================================

#[tokio::test]
async fn test_session_work_unit_lookup() {
    let db = setup_test_db().await;
    seed_standard_corpus(&db).await;
    let app = setup_app(db);

    // Ungrouped session: no unit yet
    let response = app
        .clone()
        .oneshot(get_request("/sessions/s-alpha-1/work-unit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    run_recompute(&app, false).await;

    let response = app
        .clone()
        .oneshot(get_request("/sessions/s-alpha-1/work-unit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert!(body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["session_id"] == "s-alpha-1"));

    let response = app
        .oneshot(get_request("/sessions/no-such-session/work-unit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
