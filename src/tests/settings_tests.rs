// Settings Tests

use crate::storage::Settings;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_settings_default() {
    let settings = Settings::default();

    assert_eq!(settings.database_path, "./data/messages.db");
    assert_eq!(settings.listen_addr, "127.0.0.1:8080");
    assert_eq!(settings.default_page_size, 50);
    assert_eq!(settings.max_page_size, 100);
    assert_eq!(settings.poll_interval_ms, 2_000);
    assert_eq!(settings.poll_slice_size, 10);
    assert_eq!(settings.poll_interval(), Duration::from_secs(2));
}

#[test]
fn test_settings_load_missing_file_returns_default() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("absent.json");

    let settings = Settings::load(&path).expect("Failed to load");
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_settings_load_empty_file_returns_default() {
    let file = NamedTempFile::new().expect("Failed to create temp file");

    let settings = Settings::load(file.path()).expect("Failed to load");
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_settings_save_and_load() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("config").join("dmsync.json");

    let mut settings = Settings::default();
    settings.listen_addr = "0.0.0.0:9000".to_string();
    settings.poll_interval_ms = 5_000;
    settings.save(&path).expect("Failed to save");

    let loaded = Settings::load(&path).expect("Failed to load");
    assert_eq!(loaded, settings);
}

#[test]
fn test_settings_partial_file_fills_defaults() {
    let file = NamedTempFile::new().expect("Failed to create temp file");
    std::fs::write(file.path(), r#"{ "listen_addr": "127.0.0.1:3000" }"#).expect("write");

    let settings = Settings::load(file.path()).expect("Failed to load");
    assert_eq!(settings.listen_addr, "127.0.0.1:3000");
    assert_eq!(settings.default_page_size, 50);
    assert_eq!(settings.poll_slice_size, 10);
}

#[test]
fn test_settings_normalizes_out_of_range_values() {
    let file = NamedTempFile::new().expect("Failed to create temp file");
    std::fs::write(
        file.path(),
        r#"{ "default_page_size": 500, "max_page_size": 20, "poll_interval_ms": 0 }"#,
    )
    .expect("write");

    let settings = Settings::load(file.path()).expect("Failed to load");
    assert_eq!(settings.default_page_size, 20);
    assert_eq!(settings.poll_interval_ms, 2_000);
}

#[test]
fn test_settings_invalid_json_is_error() {
    let file = NamedTempFile::new().expect("Failed to create temp file");
    std::fs::write(file.path(), "{ not json").expect("write");

    assert!(Settings::load(file.path()).is_err());
}

#[test]
fn test_effective_page_size() {
    let settings = Settings::default();

    assert_eq!(settings.effective_page_size(None), 50);
    assert_eq!(settings.effective_page_size(Some(10)), 10);
    assert_eq!(settings.effective_page_size(Some(0)), 1);
    assert_eq!(settings.effective_page_size(Some(1_000)), 100);
}
