//! # Reel Common Library
//!
//! Shared code for Reel backend services including:
//! - Domain models (sessions, work units, memberships)
//! - Database initialization and schema
//! - Configuration loading and root folder resolution
//! - Common error types
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod time;

pub use error::{Error, Result};
