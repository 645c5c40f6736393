//! HTTP API handlers for reel-wu

pub mod health;
pub mod recompute;
pub mod stats;
pub mod work_units;

pub use health::health_routes;
pub use recompute::recompute_work_units;
pub use stats::get_stats;
pub use work_units::{
    delete_work_unit, get_work_unit, get_work_unit_for_session, list_work_units, patch_work_unit,
};
