//! Domain models shared across Reel services
//!
//! Sessions are produced by the transcript ingester and are read-only
//! to every other service. Work units and their membership records are
//! owned by the correlation service (reel-wu).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::seconds_between;

/// Coding agent that produced a session.
///
/// Closed enum: unrecognized strings read from storage decode to
/// `Unknown` rather than failing the whole row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Claude,
    Codex,
    Gemini,
    Unknown,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Claude => "claude",
            Agent::Codex => "codex",
            Agent::Gemini => "gemini",
            Agent::Unknown => "unknown",
        }
    }

    /// Parse a stored agent string, falling back to `Unknown`.
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "claude" => Agent::Claude,
            "codex" => Agent::Codex,
            "gemini" => Agent::Gemini,
            "unknown" => Agent::Unknown,
            other => {
                tracing::warn!("Unrecognized agent '{}' in database, treating as unknown", other);
                Agent::Unknown
            }
        }
    }

    /// Strict parse for request parameters (query filters).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(Agent::Claude),
            "codex" => Some(Agent::Codex),
            "gemini" => Some(Agent::Gemini),
            "unknown" => Some(Agent::Unknown),
            _ => None,
        }
    }
}

/// Confidence tier of a work unit, derived from its weakest member score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

/// Signal that justified a session's membership in a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinReason {
    ProjectPathMatch,
    FileOverlap,
    TimeProximity,
    CwdMatch,
    ManualOverride,
}

impl JoinReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinReason::ProjectPathMatch => "project_path_match",
            JoinReason::FileOverlap => "file_overlap",
            JoinReason::TimeProximity => "time_proximity",
            JoinReason::CwdMatch => "cwd_match",
            JoinReason::ManualOverride => "manual_override",
        }
    }
}

/// One recorded agent session (read-only transcript metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent: Agent,
    pub model: Option<String>,
    pub project_path: String,
    pub cwd: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frame_count: i64,
    /// Paths touched during the session. BTreeSet for deterministic iteration.
    pub files_touched: BTreeSet<String>,
    pub first_user_message: Option<String>,
}

impl Session {
    pub fn duration_seconds(&self) -> i64 {
        seconds_between(self.start_time, self.end_time)
    }
}

/// A session's membership record inside a work unit.
///
/// Carries a denormalized snapshot of the session taken at join time
/// so the viewer can render unit contents without refetching sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnitSession {
    pub session_id: String,
    pub agent: Agent,
    pub model: Option<String>,
    /// Score against the unit at time of join (0.0 - 1.0)
    pub correlation_score: f64,
    /// Non-empty, sorted, deduplicated
    pub join_reasons: Vec<JoinReason>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub frame_count: i64,
    pub first_user_message: Option<String>,
}

impl WorkUnitSession {
    /// Build a membership record from a session snapshot.
    pub fn from_session(session: &Session, score: f64, mut reasons: Vec<JoinReason>) -> Self {
        reasons.sort();
        reasons.dedup();
        Self {
            session_id: session.session_id.clone(),
            agent: session.agent,
            model: session.model.clone(),
            correlation_score: score,
            join_reasons: reasons,
            start_time: session.start_time,
            end_time: session.end_time,
            duration_seconds: session.duration_seconds(),
            frame_count: session.frame_count,
            first_user_message: session.first_user_message.clone(),
        }
    }

    /// Pinned memberships are immune to automatic reassignment.
    pub fn is_pinned(&self) -> bool {
        self.join_reasons.contains(&JoinReason::ManualOverride)
    }
}

/// A group of sessions believed to represent the same underlying task.
///
/// Invariant: `sessions` is non-empty. A unit emptied by removal is
/// deleted, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: Uuid,
    /// Derived human label
    pub name: String,
    /// Representative path (most recent member's project path)
    pub project_path: String,
    /// Ordered by member start time
    pub sessions: Vec<WorkUnitSession>,
    /// Distinct agents among members, sorted
    pub agents: Vec<Agent>,
    /// Tier of the minimum member correlation score
    pub confidence: Confidence,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_seconds: i64,
    pub total_frames: i64,
    /// Union over members
    pub files_touched: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkUnit {
    pub fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.session_id == session_id)
    }

    /// Whether any member is pinned by a manual override.
    pub fn has_pinned_member(&self) -> bool {
        self.sessions.iter().any(|s| s.is_pinned())
    }

    /// Derive the display name from a project path and start date,
    /// e.g. "myrepo 2026-08-29".
    pub fn derive_name(project_path: &str, start_time: DateTime<Utc>) -> String {
        let stem = project_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("work unit");
        format!("{} {}", stem, start_time.format("%Y-%m-%d"))
    }
}
