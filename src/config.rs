//! Application configuration management.
//!
//! Settings are layered with figment, later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. TOML file (`--config`, else `config.toml` in the platform config dir)
//! 3. Environment variables prefixed `SONGDEDUPE_` (`SONGDEDUPE_IO_THREADS=2`)
//! 4. CLI flags ([`Config::merge_cli`], [`Config::merge_scan_args`])

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cli::{AnalysisArgs, Cli, ScanArgs};
use crate::duplicates::{
    ThresholdError, Thresholds, DEFAULT_IDENTICAL_THRESHOLD, DEFAULT_NEAR_THRESHOLD,
};
use crate::scanner::fingerprint::{DEFAULT_MAX_FINGERPRINT_SECS, DEFAULT_TIMEOUT};
use crate::scanner::{Fingerprinter, WalkerConfig, DEFAULT_EXTENSIONS};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SONGDEDUPE_";

/// Errors loading or saving configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid thresholds: {0}")]
    Thresholds(#[from] ThresholdError),

    #[error("cannot determine the platform config/data directories")]
    NoProjectDirs,

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fingerprint store; `None` means the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    pub identical_threshold: f64,
    pub near_threshold: f64,
    pub io_threads: usize,
    pub fingerprint_timeout_secs: u64,
    /// Seconds of audio analysed per track.
    pub max_fingerprint_secs: u32,
    pub extensions: Vec<String>,
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
    pub ignore_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: None,
            identical_threshold: DEFAULT_IDENTICAL_THRESHOLD,
            near_threshold: DEFAULT_NEAR_THRESHOLD,
            io_threads: 4,
            fingerprint_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_fingerprint_secs: DEFAULT_MAX_FINGERPRINT_SECS,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
            skip_hidden: false,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Load defaults, the config file and the environment.
    ///
    /// An explicit `path` must parse; the default file is optional.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Figment`] for malformed TOML or mistyped values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::config_path() {
                Ok(path) => Self::load_from_path(&path),
                Err(e) => {
                    log::debug!("No platform config dir ({e}), using defaults");
                    Self::extract(Figment::from(Serialized::defaults(Self::default())))
                }
            },
        }
    }

    /// Load from a specific TOML file. A missing file is skipped.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Figment`] for malformed TOML or mistyped values.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            log::debug!("Loading config from {}", path.display());
        }
        Self::extract(
            Figment::from(Serialized::defaults(Self::default())).merge(Toml::file(path)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Apply global CLI flags.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(ref store) = cli.store {
            self.store_path = Some(store.clone());
        }
    }

    /// Apply `scan` flags, including its analysis options.
    pub fn merge_scan_args(&mut self, args: &ScanArgs) {
        if !args.ignore_patterns.is_empty() {
            self.ignore_patterns.extend(args.ignore_patterns.iter().cloned());
        }
        if !args.extensions.is_empty() {
            self.extensions = args
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect();
        }
        if args.follow_symlinks {
            self.follow_symlinks = true;
        }
        if args.skip_hidden {
            self.skip_hidden = true;
        }
        self.merge_analysis_args(&args.analysis);
    }

    /// Apply options shared by `scan` and `report`.
    pub fn merge_analysis_args(&mut self, args: &AnalysisArgs) {
        if let Some(v) = args.identical_threshold {
            self.identical_threshold = v;
        }
        if let Some(v) = args.near_threshold {
            self.near_threshold = v;
        }
        if let Some(v) = args.io_threads {
            self.io_threads = v;
        }
        if let Some(v) = args.fingerprint_timeout {
            self.fingerprint_timeout_secs = v;
        }
    }

    /// Validated thresholds.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Thresholds`] when out of `[0, 1]` or inverted.
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Ok(Thresholds::new(self.identical_threshold, self.near_threshold)?)
    }

    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            follow_symlinks: self.follow_symlinks,
            skip_hidden: self.skip_hidden,
            extensions: self.extensions.clone(),
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }

    /// Chromaprint fingerprinter with the configured limits.
    #[must_use]
    pub fn fingerprinter(&self) -> Fingerprinter {
        Fingerprinter::chromaprint(self.max_fingerprint_secs)
            .with_timeout(Duration::from_secs(self.fingerprint_timeout_secs.max(1)))
    }

    /// Store location: the configured path or `tracks.db` in the data dir.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoProjectDirs`] without a home directory.
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        match self.store_path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("tracks.db")),
        }
    }

    /// Write as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default platform-specific configuration path.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoProjectDirs`] without a home directory.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("org", "songdedupe", "songdedupe").ok_or(ConfigError::NoProjectDirs)
}
