//! Integration tests for configuration loading and logging bootstrap

use bridge_traits::time::LogLevel;
use core_runtime::config::{CoreConfig, DuplicatePolicy};
use core_runtime::Error;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::path::PathBuf;

fn temp_config_path() -> PathBuf {
    std::env::temp_dir().join(format!("notesync-config-{}.json", uuid::Uuid::new_v4()))
}

#[test]
fn test_load_config_file() {
    let path = temp_config_path();
    std::fs::write(
        &path,
        r#"{
            "notion_token": "secret_0123456789abcdefghijkl",
            "notion_database_url": "https://www.notion.so/0123456789abcdef0123456789abcdef",
            "anki_query_string": "deck:Japanese",
            "duplicate_handling_way": "copy",
            "body_field": "Notes"
        }"#,
    )
    .unwrap();

    let config = CoreConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(
        config.database_id().unwrap(),
        "01234567-89ab-cdef-0123-456789abcdef"
    );
    assert_eq!(config.duplicate_policy, DuplicatePolicy::Copy);
    assert_eq!(config.body_field, "Notes");
    assert_eq!(config.run_options().source_query, "deck:Japanese");
}

#[test]
fn test_load_missing_file_names_the_path() {
    let path = temp_config_path();
    let err = CoreConfig::load(&path).unwrap_err();

    assert!(matches!(err, Error::ConfigFile { .. }));
    assert!(err.to_string().contains(&path.display().to_string()));
}

#[test]
fn test_load_rejects_malformed_json() {
    let path = temp_config_path();
    std::fs::write(&path, "{ not json").unwrap();

    let err = CoreConfig::load(&path).unwrap_err();
    std::fs::remove_file(&path).ok();

    assert!(err.to_string().contains("Invalid config file"));
}

#[test]
fn test_default_path_is_under_notesync() {
    if let Some(path) = CoreConfig::default_path() {
        assert!(path.ends_with("notesync/config.json"));
    }
}

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn);

    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}

#[test]
fn test_token_never_logged_verbatim() {
    let token = "ntn_0123456789abcdefghijklmnopq";
    assert_eq!(redact_if_sensitive("notion_token", token), "[REDACTED]");
    assert_eq!(redact_if_sensitive("message", token), "[REDACTED]");
}
