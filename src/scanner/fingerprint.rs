//! Acoustic fingerprint extraction and comparison.
//!
//! # Overview
//!
//! Fingerprinting is the expensive step of the whole pipeline, so it sits
//! behind two small traits:
//!
//! - [`FingerprintExtractor`] turns an audio file into a [`Fingerprint`]
//! - [`FingerprintComparator`] turns two fingerprints into a similarity in
//!   `[0, 1]`, `1.0` meaning the same audio
//!
//! [`Fingerprinter`] wraps an extractor with a wall-clock timeout and a
//! single retry. The default implementations decode with symphonia and
//! fingerprint with rusty-chromaprint.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusty_chromaprint::{match_fingerprints, Configuration};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Default wall-clock limit for one extraction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default amount of audio analysed per file, in seconds.
pub const DEFAULT_MAX_FINGERPRINT_SECS: u32 = 120;

/// Opaque acoustic descriptor of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// Chromaprint sub-fingerprints.
    pub points: Vec<u32>,
    /// Seconds of audio the points were computed from.
    pub duration_secs: f32,
}

impl Fingerprint {
    /// Create a fingerprint from raw points.
    #[must_use]
    pub fn new(points: Vec<u32>, duration_secs: f32) -> Self {
        Self {
            points,
            duration_secs,
        }
    }

    /// Little-endian byte encoding used by the store.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.points.iter().flat_map(|p| p.to_le_bytes()).collect()
    }

    /// Decode [`to_bytes`](Self::to_bytes) output. `None` when the blob
    /// length is not a multiple of four.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], duration_secs: f32) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let points = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self::new(points, duration_secs))
    }

    /// Whether no audio was analysed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Errors from fingerprint extraction.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// The audio could not be decoded (corrupt or unsupported).
    #[error("decode error: {0}")]
    Decode(String),

    /// Extraction did not finish within the time limit.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<SymphoniaError> for ExtractError {
    fn from(err: SymphoniaError) -> Self {
        match err {
            SymphoniaError::IoError(e) => Self::Io(e),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Computes a fingerprint for one audio file.
pub trait FingerprintExtractor: Send + Sync {
    /// Extract a fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the file cannot be read or decoded.
    fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError>;

    /// Extract, giving up early once `cancel` is set.
    ///
    /// The default ignores the flag and runs [`extract`](Self::extract) to
    /// the end.
    ///
    /// # Errors
    ///
    /// As [`extract`](Self::extract); the result after cancellation is
    /// discarded by the caller.
    fn extract_with_cancel(
        &self,
        path: &Path,
        cancel: &AtomicBool,
    ) -> Result<Fingerprint, ExtractError> {
        let _ = cancel;
        self.extract(path)
    }
}

/// Scores two fingerprints.
pub trait FingerprintComparator: Send + Sync {
    /// Similarity in `[0, 1]`. Must be symmetric.
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64;
}

/// Timeout-bounded front end over a [`FingerprintExtractor`].
///
/// Each attempt runs on its own thread; when the deadline passes the attempt
/// is reported as [`ExtractError::Timeout`] and its cancel flag is set. A
/// timed-out file is tried once more before giving up.
///
/// The thread itself is not joined. Extractors that check the flag
/// ([`ChromaprintExtractor`] does, between packets) stop soon after; one
/// using the default [`FingerprintExtractor::extract_with_cancel`] keeps
/// running until its own `extract` returns.
#[derive(Clone)]
pub struct Fingerprinter {
    extractor: Arc<dyn FingerprintExtractor>,
    timeout: Duration,
    max_attempts: u32,
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Fingerprinter {
    /// Wrap an extractor with the default timeout and one retry.
    #[must_use]
    pub fn new(extractor: Arc<dyn FingerprintExtractor>) -> Self {
        Self {
            extractor,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 2,
        }
    }

    /// Chromaprint extractor analysing at most `max_secs` seconds.
    #[must_use]
    pub fn chromaprint(max_secs: u32) -> Self {
        Self::new(Arc::new(ChromaprintExtractor::new(max_secs)))
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many attempts a timing-out file gets (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Extract a fingerprint, retrying once on timeout.
    ///
    /// # Errors
    ///
    /// Returns the extractor's error, or [`ExtractError::Timeout`] when every
    /// attempt ran out of time.
    pub fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        let mut attempt = 1;
        loop {
            match self.extract_once(path) {
                Err(ExtractError::Timeout(limit)) if attempt < self.max_attempts => {
                    log::warn!(
                        "Fingerprinting {} timed out after {:?}, retrying",
                        path.display(),
                        limit
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn extract_once(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        let (tx, rx) = mpsc::channel();
        let extractor = Arc::clone(&self.extractor);
        let owned: PathBuf = path.to_path_buf();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);

        thread::Builder::new()
            .name("fingerprint".to_string())
            .spawn(move || {
                let _ = tx.send(extractor.extract_with_cancel(&owned, &worker_cancel));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::SeqCst);
                Err(ExtractError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(ExtractError::Decode("extractor thread panicked".to_string()))
            }
        }
    }
}

/// symphonia + rusty-chromaprint extractor.
pub struct ChromaprintExtractor {
    config: Configuration,
    max_secs: u32,
}

impl fmt::Debug for ChromaprintExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromaprintExtractor")
            .field("max_secs", &self.max_secs)
            .finish_non_exhaustive()
    }
}

impl Default for ChromaprintExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FINGERPRINT_SECS)
    }
}

impl ChromaprintExtractor {
    /// Analyse at most `max_secs` seconds of each file.
    #[must_use]
    pub fn new(max_secs: u32) -> Self {
        Self {
            config: Configuration::preset_test2(),
            max_secs: max_secs.max(1),
        }
    }
}

impl FingerprintExtractor for ChromaprintExtractor {
    fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        self.decode(path, None)
    }

    fn extract_with_cancel(
        &self,
        path: &Path,
        cancel: &AtomicBool,
    ) -> Result<Fingerprint, ExtractError> {
        self.decode(path, Some(cancel))
    }
}

impl ChromaprintExtractor {
    fn decode(&self, path: &Path, cancel: Option<&AtomicBool>) -> Result<Fingerprint, ExtractError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| ExtractError::Decode("no audio track".to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| ExtractError::Decode("unknown sample rate".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| ExtractError::Decode("unknown channel layout".to_string()))?;

        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut printer = rusty_chromaprint::Fingerprinter::new(&self.config);
        printer
            .start(sample_rate, channels as u32)
            .map_err(|e| ExtractError::Decode(format!("{e:?}")))?;

        let frame_limit = u64::from(sample_rate) * u64::from(self.max_secs);
        let mut frames: u64 = 0;
        let mut sample_buf: Option<SampleBuffer<i16>> = None;

        while frames < frame_limit {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                log::debug!("Fingerprinting {} cancelled", path.display());
                return Err(ExtractError::Decode("cancelled".to_string()));
            }
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let buf = sample_buf.get_or_insert_with(|| {
                        SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec())
                    });
                    buf.copy_interleaved_ref(decoded);
                    printer.consume(buf.samples());
                    frames += (buf.samples().len() / channels.max(1)) as u64;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    log::trace!("Skipping undecodable packet in {}: {}", path.display(), e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        printer.finish();
        let points = printer.fingerprint().to_vec();
        if points.is_empty() {
            return Err(ExtractError::Decode("no audio decoded".to_string()));
        }

        let duration_secs = frames as f32 / sample_rate as f32;
        Ok(Fingerprint::new(points, duration_secs))
    }
}

/// Chromaprint segment matcher.
///
/// Similarity is the matched duration, weighted by each segment's bit-error
/// quality, divided by the longer of the two analysed durations.
pub struct ChromaprintComparator {
    config: Configuration,
}

impl fmt::Debug for ChromaprintComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromaprintComparator").finish_non_exhaustive()
    }
}

impl Default for ChromaprintComparator {
    fn default() -> Self {
        Self {
            config: Configuration::preset_test2(),
        }
    }
}

impl FingerprintComparator for ChromaprintComparator {
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a.points == b.points {
            return 1.0;
        }

        let longest = f64::from(a.duration_secs.max(b.duration_secs));
        if longest <= 0.0 {
            return 0.0;
        }

        let segments = match match_fingerprints(&a.points, &b.points, &self.config) {
            Ok(segments) => segments,
            Err(e) => {
                log::debug!("Fingerprint matching failed: {:?}", e);
                return 0.0;
            }
        };

        let matched: f64 = segments
            .iter()
            .map(|seg| {
                let quality = (1.0 - f64::from(seg.score) / 32.0).max(0.0);
                f64::from(seg.duration(&self.config)) * quality
            })
            .sum();

        (matched / longest).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct SlowExtractor {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FingerprintExtractor for SlowExtractor {
        fn extract(&self, _path: &Path) -> Result<Fingerprint, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(Fingerprint::new(vec![1, 2, 3], 1.0))
        }
    }

    /// Spins until cancelled, counting the attempts that stopped.
    struct StuckExtractor {
        stopped: AtomicUsize,
    }

    impl FingerprintExtractor for StuckExtractor {
        fn extract(&self, _path: &Path) -> Result<Fingerprint, ExtractError> {
            unreachable!("called through extract_with_cancel")
        }

        fn extract_with_cancel(
            &self,
            _path: &Path,
            cancel: &AtomicBool,
        ) -> Result<Fingerprint, ExtractError> {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !cancel.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Err(ExtractError::Decode("cancelled".to_string()))
        }
    }

    struct FailingExtractor;

    impl FingerprintExtractor for FailingExtractor {
        fn extract(&self, _path: &Path) -> Result<Fingerprint, ExtractError> {
            Err(ExtractError::Decode("unsupported".to_string()))
        }
    }

    #[test]
    fn test_fingerprint_bytes_round_trip() {
        let fp = Fingerprint::new(vec![0, 1, u32::MAX, 0xDEAD_BEEF], 12.5);
        let bytes = fp.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Fingerprint::from_bytes(&bytes, 12.5), Some(fp));
    }

    #[test]
    fn test_fingerprint_from_truncated_bytes() {
        assert_eq!(Fingerprint::from_bytes(&[1, 2, 3], 1.0), None);
    }

    #[test]
    fn test_fingerprinter_passes_result_through() {
        let extractor = Arc::new(SlowExtractor {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let fp = Fingerprinter::new(extractor.clone())
            .extract(Path::new("a.mp3"))
            .unwrap();
        assert_eq!(fp.points, vec![1, 2, 3]);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fingerprinter_times_out_and_retries_once() {
        let extractor = Arc::new(SlowExtractor {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(300),
        });
        let result = Fingerprinter::new(extractor.clone())
            .with_timeout(Duration::from_millis(20))
            .extract(Path::new("slow.flac"));

        assert!(matches!(result, Err(ExtractError::Timeout(_))));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timed_out_attempts_are_cancelled() {
        let extractor = Arc::new(StuckExtractor {
            stopped: AtomicUsize::new(0),
        });
        let result = Fingerprinter::new(extractor.clone())
            .with_timeout(Duration::from_millis(20))
            .extract(Path::new("stuck.flac"));
        assert!(matches!(result, Err(ExtractError::Timeout(_))));

        let deadline = Instant::now() + Duration::from_secs(2);
        while extractor.stopped.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(extractor.stopped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fingerprinter_does_not_retry_decode_errors() {
        let result = Fingerprinter::new(Arc::new(FailingExtractor)).extract(Path::new("x.mp3"));
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }

    #[test]
    fn test_chromaprint_extractor_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.mp3");
        std::fs::write(&path, b"definitely not an mpeg stream").unwrap();
        assert!(ChromaprintExtractor::default().extract(&path).is_err());
    }

    #[test]
    fn test_comparator_identical_and_empty() {
        let cmp = ChromaprintComparator::default();
        let a = Fingerprint::new(vec![5; 64], 10.0);
        assert!((cmp.similarity(&a, &a.clone()) - 1.0).abs() < f64::EPSILON);

        let empty = Fingerprint::new(Vec::new(), 0.0);
        assert_eq!(cmp.similarity(&a, &empty), 0.0);
    }
}
