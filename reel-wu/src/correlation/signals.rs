//! Correlation signal extraction
//!
//! Derives a comparable feature vector from two correlation profiles.
//! A profile is either a single session or a unit-level aggregate
//! (union of members' files, most recent project path, overall span).
//! Pure functions, no side effects.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use reel_common::model::{Session, WorkUnit};

/// Comparable view of a session or a work unit for signal extraction.
#[derive(Debug, Clone)]
pub struct CorrelationProfile {
    /// Normalized project path
    pub project_path: String,
    /// Normalized working directory. Unit aggregates carry no cwd; the
    /// cwd signal only fires between two sessions.
    pub cwd: Option<String>,
    pub files_touched: BTreeSet<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CorrelationProfile {
    pub fn from_session(session: &Session) -> Self {
        Self {
            project_path: normalize_path(&session.project_path),
            cwd: Some(normalize_path(&session.cwd)),
            files_touched: session.files_touched.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
        }
    }

    /// Profile of a stored work unit: union of member files, the
    /// representative project path, and the unit's time span.
    pub fn from_unit(unit: &WorkUnit) -> Self {
        Self {
            project_path: normalize_path(&unit.project_path),
            cwd: None,
            files_touched: unit.files_touched.clone(),
            start_time: unit.start_time,
            end_time: unit.end_time,
        }
    }

    /// Fold another session into a unit-level aggregate: union the file
    /// sets, widen the span, and take the most recent member's project
    /// path as representative.
    pub fn absorb(&mut self, session: &Session) {
        if session.end_time >= self.end_time {
            self.project_path = normalize_path(&session.project_path);
        }
        self.cwd = None;
        self.files_touched
            .extend(session.files_touched.iter().cloned());
        self.start_time = self.start_time.min(session.start_time);
        self.end_time = self.end_time.max(session.end_time);
    }
}

/// Feature vector for one profile pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalVector {
    pub path_match: bool,
    pub cwd_match: bool,
    /// Jaccard similarity of the touched-file sets, 0 when both empty
    pub file_overlap: f64,
    /// 1.0 when the spans overlap, linearly decaying to 0 at the horizon
    pub time_proximity: f64,
}

/// Extract the feature vector for a pair of profiles. Symmetric.
pub fn extract_signals(
    a: &CorrelationProfile,
    b: &CorrelationProfile,
    horizon_seconds: i64,
) -> SignalVector {
    let path_match = !a.project_path.is_empty() && a.project_path == b.project_path;
    let cwd_match = match (&a.cwd, &b.cwd) {
        (Some(x), Some(y)) => !x.is_empty() && x == y,
        _ => false,
    };

    SignalVector {
        path_match,
        cwd_match,
        file_overlap: jaccard(&a.files_touched, &b.files_touched),
        time_proximity: time_proximity(
            a.start_time,
            a.end_time,
            b.start_time,
            b.end_time,
            horizon_seconds,
        ),
    }
}

/// Normalize a filesystem path for comparison: trim trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        // "/" normalizes to itself, not to the empty string
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Jaccard similarity |A ∩ B| / |A ∪ B|, defined as 0 when both sets
/// are empty.
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Decayed time proximity between two spans: 1.0 when they overlap,
/// otherwise max(0, 1 - gap/horizon).
fn time_proximity(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
    horizon_seconds: i64,
) -> f64 {
    let gap_seconds = if a_end < b_start {
        b_start.signed_duration_since(a_end).num_seconds()
    } else if b_end < a_start {
        a_start.signed_duration_since(b_end).num_seconds()
    } else {
        return 1.0;
    };

    if horizon_seconds <= 0 {
        return 0.0;
    }
    (1.0 - gap_seconds as f64 / horizon_seconds as f64).max(0.0)
}
