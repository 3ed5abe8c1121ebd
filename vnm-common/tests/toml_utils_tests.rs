//! Unit tests for TOML atomic write utilities

use std::path::PathBuf;
use tempfile::TempDir;
use vnm_common::config::{load_toml_config, write_toml_config, LoggingConfig, TomlConfig};

fn sample_config() -> TomlConfig {
    let mut config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/vnm")),
        logging: LoggingConfig {
            level: "debug".to_string(),
            log_file: None,
        },
        ..TomlConfig::default()
    };
    config.probe.concurrency = 4;
    config.probe.throughput_command = Some("speedcheck {ip} {login} {password}".to_string());
    config.activation.command = Some("/usr/local/bin/vnm-activate".to_string());
    config
}

#[test]
fn test_atomic_write_leaves_no_temp_file() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("vnm-ingest.toml");

    write_toml_config(&sample_config(), &target).unwrap();

    assert!(target.exists());
    assert!(!temp_dir.path().join("vnm-ingest.toml.tmp").exists());
}

#[test]
fn test_written_config_reads_back_identically() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("conf").join("vnm-ingest.toml");
    let config = sample_config();

    write_toml_config(&config, &target).unwrap();
    let loaded = load_toml_config(&target).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_overwrite_replaces_previous_content() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("vnm-ingest.toml");

    write_toml_config(&sample_config(), &target).unwrap();
    let mut updated = sample_config();
    updated.import.freshness_window_days = 14;
    write_toml_config(&updated, &target).unwrap();

    let loaded = load_toml_config(&target).unwrap();
    assert_eq!(loaded.import.freshness_window_days, 14);
}
