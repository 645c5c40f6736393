//! Session correlation: signal extraction, scoring, and grouping
//!
//! The pipeline is pure over immutable snapshots: `signals` derives a
//! comparable feature vector from two profiles, `scorer` folds it into
//! a single correlation score with join reasons, and `engine` runs the
//! full greedy regrouping pass. Persistence lives in `crate::db`.

pub mod engine;
pub mod scorer;
pub mod signals;

pub use engine::{regroup, rebuild_unit, RecomputeOutcome};
pub use scorer::{score_pair, CorrelationConfig, PairScore};
pub use signals::{extract_signals, CorrelationProfile, SignalVector};
