//! Correlation scoring
//!
//! Folds a signal vector into a single score in [0, 1] via a weighted
//! sum, tags the signals that individually cleared their trigger
//! thresholds as join reasons, and maps scores to confidence tiers.
//! Weights and thresholds are tunable defaults seeded into the
//! settings table at init.

use reel_common::db::get_setting;
use reel_common::model::{Confidence, JoinReason};
use reel_common::Result;
use sqlx::SqlitePool;

use crate::correlation::signals::SignalVector;

/// Scoring weights and thresholds.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub weight_path_match: f64,
    pub weight_file_overlap: f64,
    pub weight_time_proximity: f64,
    pub weight_cwd_match: f64,
    /// File overlap above this tags `file_overlap` as a join reason
    pub trigger_file_overlap: f64,
    /// Time proximity above this tags `time_proximity` as a join reason
    pub trigger_time_proximity: f64,
    /// Time proximity decays to 0 at this gap
    pub time_horizon_seconds: i64,
    /// score >= high -> High
    pub high_threshold: f64,
    /// score >= medium -> Medium (and eligible for automatic grouping)
    pub medium_threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            weight_path_match: 0.35,
            weight_file_overlap: 0.30,
            weight_time_proximity: 0.25,
            weight_cwd_match: 0.10,
            trigger_file_overlap: 0.2,
            trigger_time_proximity: 0.5,
            time_horizon_seconds: 14400,
            high_threshold: 0.7,
            medium_threshold: 0.4,
        }
    }
}

impl CorrelationConfig {
    /// Load tunables from the settings table, falling back to defaults
    /// for missing or unparseable values.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            weight_path_match: load_f64(pool, "wu_weight_path_match", defaults.weight_path_match)
                .await?,
            weight_file_overlap: load_f64(
                pool,
                "wu_weight_file_overlap",
                defaults.weight_file_overlap,
            )
            .await?,
            weight_time_proximity: load_f64(
                pool,
                "wu_weight_time_proximity",
                defaults.weight_time_proximity,
            )
            .await?,
            weight_cwd_match: load_f64(pool, "wu_weight_cwd_match", defaults.weight_cwd_match)
                .await?,
            trigger_file_overlap: load_f64(
                pool,
                "wu_trigger_file_overlap",
                defaults.trigger_file_overlap,
            )
            .await?,
            trigger_time_proximity: load_f64(
                pool,
                "wu_trigger_time_proximity",
                defaults.trigger_time_proximity,
            )
            .await?,
            time_horizon_seconds: load_i64(
                pool,
                "wu_time_horizon_seconds",
                defaults.time_horizon_seconds,
            )
            .await?,
            high_threshold: load_f64(pool, "wu_high_threshold", defaults.high_threshold).await?,
            medium_threshold: load_f64(pool, "wu_medium_threshold", defaults.medium_threshold)
                .await?,
        })
    }

    /// Map a score to its confidence tier.
    pub fn tier_for(&self, score: f64) -> Confidence {
        if score >= self.high_threshold {
            Confidence::High
        } else if score >= self.medium_threshold {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// Whether a pair score qualifies for automatic grouping.
    pub fn eligible(&self, pair: &PairScore) -> bool {
        !pair.reasons.is_empty() && pair.score >= self.medium_threshold
    }
}

async fn load_f64(pool: &SqlitePool, key: &str, default: f64) -> Result<f64> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

async fn load_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Combined score and triggered join reasons for one profile pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScore {
    pub score: f64,
    /// Sorted; empty means the pair shares no signal and scores 0
    pub reasons: Vec<JoinReason>,
}

/// Score a signal vector. A pair with zero triggered signals yields
/// score 0 and is never joined automatically.
pub fn score_pair(signals: &SignalVector, config: &CorrelationConfig) -> PairScore {
    let mut reasons = Vec::new();
    if signals.path_match {
        reasons.push(JoinReason::ProjectPathMatch);
    }
    if signals.file_overlap > config.trigger_file_overlap {
        reasons.push(JoinReason::FileOverlap);
    }
    if signals.time_proximity > config.trigger_time_proximity {
        reasons.push(JoinReason::TimeProximity);
    }
    if signals.cwd_match {
        reasons.push(JoinReason::CwdMatch);
    }

    if reasons.is_empty() {
        return PairScore {
            score: 0.0,
            reasons,
        };
    }

    let path_component = if signals.path_match { 1.0 } else { 0.0 };
    let cwd_component = if signals.cwd_match { 1.0 } else { 0.0 };
    let score = config.weight_path_match * path_component
        + config.weight_file_overlap * signals.file_overlap
        + config.weight_time_proximity * signals.time_proximity
        + config.weight_cwd_match * cwd_component;

    reasons.sort();
    PairScore {
        score: score.clamp(0.0, 1.0),
        reasons,
    }
}
