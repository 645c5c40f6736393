//! Database access layer

pub mod init;

pub use init::{ensure_setting, get_setting, init_database, init_in_memory, set_setting};
