//! Tests for root folder resolution
//!
//! Note: Uses serial_test to prevent ENV variable race conditions.
//! Tests that manipulate REEL_ROOT_FOLDER are marked with #[serial].

use reel_common::config::{database_path, ensure_root_folder, resolve_root_folder};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_arg_beats_env() {
    env::set_var("REEL_ROOT_FOLDER", "/tmp/from-env");
    let root = resolve_root_folder(Some("/tmp/from-cli")).unwrap();
    env::remove_var("REEL_ROOT_FOLDER");
    assert_eq!(root, PathBuf::from("/tmp/from-cli"));
}

#[test]
#[serial]
fn test_env_var_used_without_cli_arg() {
    env::set_var("REEL_ROOT_FOLDER", "/tmp/from-env");
    let root = resolve_root_folder(None).unwrap();
    env::remove_var("REEL_ROOT_FOLDER");
    assert_eq!(root, PathBuf::from("/tmp/from-env"));
}

#[test]
#[serial]
fn test_fallback_default_is_nonempty() {
    env::remove_var("REEL_ROOT_FOLDER");
    let root = resolve_root_folder(None).unwrap();
    assert!(!root.as_os_str().is_empty());
}

#[test]
fn test_ensure_root_folder_creates_directory() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nested").join("reel-root");
    assert!(!root.exists());

    ensure_root_folder(&root).unwrap();
    assert!(root.is_dir());

    // Idempotent
    ensure_root_folder(&root).unwrap();
}

#[test]
fn test_database_path_inside_root() {
    let root = PathBuf::from("/data/reel");
    assert_eq!(database_path(&root), PathBuf::from("/data/reel/reel.db"));
}
