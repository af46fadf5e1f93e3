//! Layered configuration: defaults < TOML file < environment < CLI flags.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use songdedupe::cli::{Cli, Commands};
use songdedupe::config::{Config, ConfigError};
use tempfile::tempdir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Clear all SONGDEDUPE_* environment variables to avoid interference.
fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("SONGDEDUPE_") {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.io_threads, 4);
    assert_eq!(config.identical_threshold, 0.95);
    assert_eq!(config.near_threshold, 0.55);
    assert_eq!(config.fingerprint_timeout_secs, 30);
    assert!(config.extensions.contains(&"flac".to_string()));
    assert!(config.thresholds().is_ok());
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let config = Config::load_from_path(&dir.path().join("nope.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_hierarchy_file_env_cli() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "io_threads = 8\nnear_threshold = 0.6\nextensions = [\"mp3\"]\n",
    )
    .unwrap();

    std::env::set_var("SONGDEDUPE_NEAR_THRESHOLD", "0.7");
    let mut config = Config::load_from_path(&path).unwrap();
    clear_env();

    assert_eq!(config.io_threads, 8);
    assert_eq!(config.near_threshold, 0.7);
    assert_eq!(config.extensions, vec!["mp3"]);

    let cli = Cli::try_parse_from([
        "songdedupe",
        "--store",
        "/tmp/custom.db",
        "scan",
        "/music",
        "--near-threshold",
        "0.8",
        "--ext",
        ".FLAC",
    ])
    .unwrap();
    config.merge_cli(&cli);
    if let Commands::Scan(args) = &cli.command {
        config.merge_scan_args(args);
    }

    assert_eq!(config.near_threshold, 0.8);
    assert_eq!(config.io_threads, 8);
    assert_eq!(config.extensions, vec!["flac"]);
    assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/custom.db"));
}

#[test]
fn test_config_invalid_toml_is_error() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "io_threads = \"many\"\n").unwrap();

    assert!(matches!(
        Config::load_from_path(&path),
        Err(ConfigError::Figment(_))
    ));
}

#[test]
fn test_config_inverted_thresholds_rejected() {
    let config = Config {
        identical_threshold: 0.5,
        near_threshold: 0.9,
        ..Config::default()
    };
    assert!(matches!(
        config.thresholds(),
        Err(ConfigError::Thresholds(_))
    ));
}

#[test]
fn test_config_save_round_trip() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("sub").join("config.toml");
    let config = Config {
        io_threads: 2,
        ignore_patterns: vec!["Podcasts/".to_string()],
        ..Config::default()
    };
    config.save(&path).unwrap();

    let saved = fs::read_to_string(&path).unwrap();
    assert!(saved.contains("io_threads = 2"));
    assert_eq!(Config::load_from_path(&path).unwrap(), config);
}
