//! Database queries for the correlation service
//!
//! `sessions` is read-only (written by the transcript ingester);
//! `work_units` owns the work unit store contract.

pub mod sessions;
pub mod work_units;
