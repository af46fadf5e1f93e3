//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct for traversing a music
//! library and yielding the audio files in it. Children are sorted by name
//! so the walk order, and every decision derived from it, is deterministic.
//!
//! # Features
//!
//! - Parallel directory traversal using rayon thread pool
//! - Extension filter (mp3, m4a, flac, ... by default)
//! - Gitignore-style pattern matching via the `ignore` crate
//! - Hidden file filtering
//! - Graceful shutdown via atomic flag

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::{AudioFile, ScanError, WalkerConfig};
use crate::progress::ProgressCallback;

/// Directory walker for parallel audio file discovery.
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for Walker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walker")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("shutdown_flag", &self.shutdown_flag)
            .finish_non_exhaustive()
    }
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
            progress_callback: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report each discovered file to a progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and a root `.gitignore`.
    fn build_gitignore(&self) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(&self.root);

        let gitignore_path = self.root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    fn should_ignore(&self, path: &Path, is_dir: bool, gitignore: &Option<Gitignore>) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };
        let relative_path = path.strip_prefix(&self.root).unwrap_or(path);
        let path_str = relative_path.to_string_lossy();
        let normalized_path = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };
        gi.matched_path_or_any_parents(normalized_path, is_dir)
            .is_ignore()
    }

    /// Walk the directory tree, yielding audio files.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration. Empty files are skipped: they cannot hold audio.
    pub fn walk(&self) -> impl Iterator<Item = Result<AudioFile, ScanError>> + '_ {
        let gitignore = self.build_gitignore();
        let mut seen = 0usize;

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(|_depth, _path, _read_dir_state, children| {
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().filter_map(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                    return Some(Err(classify_walk_error(path, e.into())));
                }
            };

            let path = entry.path();
            if path == self.root || entry.file_type().is_dir() {
                return None;
            }
            if entry.file_type().is_symlink() && !self.config.follow_symlinks {
                log::trace!("Skipping symlink: {}", path.display());
                return None;
            }
            if !self.config.matches_extension(&path) {
                return None;
            }
            if self.should_ignore(&path, false, &gitignore) {
                log::trace!("Ignoring file: {}", path.display());
                return None;
            }

            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => return Some(Err(classify_walk_error(path, e))),
            };
            if !metadata.is_file() {
                return None;
            }
            if metadata.len() == 0 {
                log::debug!("Skipping empty file: {}", path.display());
                return None;
            }

            seen += 1;
            if let Some(ref callback) = self.progress_callback {
                callback.on_progress(seen, path.to_string_lossy().as_ref());
            }

            Some(Ok(AudioFile::new(path, metadata.len())))
        })
    }
}

fn classify_walk_error(path: PathBuf, err: std::io::Error) -> ScanError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            log::warn!("Permission denied: {}", path.display());
            ScanError::PermissionDenied(path)
        }
        std::io::ErrorKind::NotFound => ScanError::NotFound(path),
        _ => {
            log::warn!("I/O error for {}: {}", path.display(), err);
            ScanError::Io { path, source: err }
        }
    }
}
