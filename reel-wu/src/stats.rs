//! Aggregate statistics over the work unit store
//!
//! Pure read-side projection, recomputed per call.

use std::collections::BTreeMap;

use reel_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::db::work_units;

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceCounts {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkUnitStats {
    pub total: i64,
    pub by_confidence: ConfidenceCounts,
    /// Units-per-agent: a unit with both claude and codex members
    /// counts once for each agent.
    pub by_agent: BTreeMap<String, i64>,
    pub ungrouped_sessions: i64,
}

pub async fn collect(pool: &SqlitePool) -> Result<WorkUnitStats> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_units")
        .fetch_one(pool)
        .await?;

    let mut by_confidence = ConfidenceCounts {
        high: 0,
        medium: 0,
        low: 0,
    };
    let rows = sqlx::query("SELECT confidence, COUNT(*) AS n FROM work_units GROUP BY confidence")
        .fetch_all(pool)
        .await?;
    for row in &rows {
        let confidence: String = row.try_get("confidence")?;
        let n: i64 = row.try_get("n")?;
        match confidence.as_str() {
            "high" => by_confidence.high = n,
            "medium" => by_confidence.medium = n,
            "low" => by_confidence.low = n,
            _ => {}
        }
    }

    let rows = sqlx::query(
        "SELECT agent, COUNT(DISTINCT work_unit_id) AS n FROM work_unit_sessions GROUP BY agent",
    )
    .fetch_all(pool)
    .await?;
    let mut by_agent = BTreeMap::new();
    for row in &rows {
        let agent: String = row.try_get("agent")?;
        let n: i64 = row.try_get("n")?;
        by_agent.insert(agent, n);
    }

    let ungrouped_sessions = work_units::ungrouped_count(pool).await?;

    Ok(WorkUnitStats {
        total,
        by_confidence,
        by_agent,
        ungrouped_sessions,
    })
}
