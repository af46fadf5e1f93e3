//! Scanner module: the thin I/O collaborators around the dedupe core.
//!
//! This module provides functionality for:
//! - Parallel directory walking using jwalk, filtered to audio extensions
//! - Content hashing with BLAKE3
//! - Tag reading (artist, title, album, duration, bitrate) via lofty
//! - Acoustic fingerprint extraction and comparison via chromaprint
//!
//! # Architecture
//!
//! - [`walker`]: Directory traversal and audio file discovery
//! - [`hasher`]: BLAKE3 content hashing (streaming / mmap)
//! - [`tags`]: [`TagReader`] trait and the lofty implementation
//! - [`fingerprint`]: [`FingerprintExtractor`] / [`FingerprintComparator`]
//!   traits, the timeout-bounded [`Fingerprinter`] and chromaprint defaults
//!
//! The dedupe core only sees these through traits, so tests can swap in
//! fakes without touching real audio.
//!
//! # Example
//!
//! ```no_run
//! use songdedupe::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/music"), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod fingerprint;
pub mod hasher;
pub mod tags;
pub mod walker;

use std::io;
use std::path::{Path, PathBuf};

// Re-export main types
pub use fingerprint::{
    ChromaprintComparator, ChromaprintExtractor, ExtractError, Fingerprint,
    FingerprintComparator, FingerprintExtractor, Fingerprinter,
};
pub use hasher::{hash_to_hex, hex_to_hash, ContentHash, ContentHasher};
pub use tags::{LoftyTagReader, TagField, TagReader, TrackTags};
pub use walker::Walker;

/// Extensions scanned when the configuration does not say otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "ogg", "wav"];

/// An audio file discovered by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
}

impl AudioFile {
    /// Create a new AudioFile.
    #[must_use]
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self { path, size }
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Lowercase file extensions (without dot) to include.
    pub extensions: Vec<String>,

    /// Glob patterns to ignore (gitignore-style).
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: false,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl WalkerConfig {
    /// Check whether a path carries one of the configured extensions.
    #[must_use]
    pub fn matches_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Hashing a discovered file failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl ScanError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) | Self::Io { path: p, .. } => p,
            Self::Hash(e) => e.path(),
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl HashError {
    /// Classify an I/O error for the given path.
    #[must_use]
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p) | Self::PermissionDenied(p) | Self::Io { path: p, .. } => p,
        }
    }
}
