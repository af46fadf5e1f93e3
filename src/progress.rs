//! Progress reporting utilities using indicatif.
//!
//! This module provides the [`Progress`] struct which implements
//! [`ProgressCallback`] to display progress bars while a library is walked,
//! hashed, fingerprinted and scored.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Phase names reported by the pipeline.
pub mod phase {
    /// Directory traversal.
    pub const WALKING: &str = "walking";
    /// BLAKE3 content hashing and tag reading.
    pub const HASHING: &str = "hashing";
    /// Acoustic fingerprint extraction for uncached tracks.
    pub const FINGERPRINTING: &str = "fingerprinting";
    /// Pairwise similarity scoring per cluster.
    pub const SCORING: &str = "scoring";
}

/// Progress callback for the dedupe pipeline.
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (see [`phase`])
    /// * `total` - Total number of items to process, 0 when unknown
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Current item number (1-based)
    /// * `path` - Path or label of the item being processed
    fn on_progress(&self, current: usize, path: &str);

    /// Called when an item has been processed, providing its size.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    walking: Mutex<Option<ProgressBar>>,
    counted: Mutex<Option<(String, ProgressBar)>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Examples
    ///
    /// ```
    /// use songdedupe::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            walking: Mutex::new(None),
            counted: Mutex::new(None),
            quiet,
        }
    }

    fn walking_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn counted_style(phase: &str) -> ProgressStyle {
        let color = match phase {
            phase::FINGERPRINTING => "magenta/blue",
            phase::SCORING => "green/blue",
            _ => "cyan/blue",
        };
        ProgressStyle::with_template(&format!(
            "[{{elapsed_precise}}] [{{bar:40.{color}}}] {{pos}}/{{len}} ({{percent}}%) {{msg}} (ETA: {{eta}})"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn label(phase: &str) -> &'static str {
        match phase {
            phase::HASHING => "Hashing",
            phase::FINGERPRINTING => "Fingerprinting",
            phase::SCORING => "Scoring clusters",
            _ => "Working",
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        if phase == phase::WALKING {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::walking_style());
            pb.set_message("Walking library");
            pb.enable_steady_tick(Duration::from_millis(100));
            *self.walking.lock().unwrap() = Some(pb);
            return;
        }

        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(Self::counted_style(phase));
        pb.set_message(Self::label(phase));
        *self.counted.lock().unwrap() = Some((phase.to_string(), pb));
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }

        let display_msg = truncate_path(path, 30);
        if let Some((_, ref pb)) = *self.counted.lock().unwrap() {
            pb.set_position(current as u64);
            pb.set_message(display_msg);
        } else if let Some(ref pb) = *self.walking.lock().unwrap() {
            pb.set_position(current as u64);
            pb.set_message(display_msg);
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        if phase == phase::WALKING {
            if let Some(pb) = self.walking.lock().unwrap().take() {
                pb.finish_with_message("Walking complete");
            }
            return;
        }

        let mut counted = self.counted.lock().unwrap();
        if counted.as_ref().is_some_and(|(name, _)| name == phase) {
            if let Some((_, pb)) = counted.take() {
                pb.finish_with_message(format!("{} complete", Self::label(phase)));
            }
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }

        if let Some((_, ref pb)) = *self.counted.lock().unwrap() {
            pb.set_message(message.to_string());
        } else if let Some(ref pb) = *self.walking.lock().unwrap() {
            pb.set_message(message.to_string());
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let count = file_name.chars().count();
    if count >= max_len {
        let tail: String = file_name.chars().skip(count - (max_len - 3)).collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
