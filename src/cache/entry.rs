//! Track records stored in the fingerprint store.

use std::path::PathBuf;

use crate::scanner::{ContentHash, Fingerprint, TagField, TrackTags};

/// One track, identified by the BLAKE3 hash of its bytes.
///
/// `file_path` is the track's current location and changes in place when the
/// file moves; every other field follows the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub content_hash: ContentHash,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub artist: TagField,
    pub title: TagField,
    pub album: TagField,
    pub track_number: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<u32>,
    /// Absent until computed. Once stored it is never recomputed.
    pub fingerprint: Option<Fingerprint>,
}

impl TrackRecord {
    /// Record with no tags and no fingerprint.
    #[must_use]
    pub fn new(content_hash: ContentHash, file_path: impl Into<PathBuf>, file_size: u64) -> Self {
        Self {
            content_hash,
            file_path: file_path.into(),
            file_size,
            artist: TagField::Missing,
            title: TagField::Missing,
            album: TagField::Missing,
            track_number: None,
            duration_seconds: None,
            bitrate_kbps: None,
            fingerprint: None,
        }
    }

    /// Copy tag values onto the record.
    #[must_use]
    pub fn with_tags(mut self, tags: TrackTags) -> Self {
        self.artist = tags.artist;
        self.title = tags.title;
        self.album = tags.album;
        self.track_number = tags.track_number;
        self.duration_seconds = tags.duration_seconds;
        self.bitrate_kbps = tags.bitrate_kbps;
        self
    }

    /// Attach a fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Whether a fingerprint is stored.
    #[must_use]
    pub fn has_fingerprint(&self) -> bool {
        self.fingerprint.is_some()
    }
}

/// Counts reported by `songdedupe stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Records attached to a path.
    pub records: usize,
    /// Attached records with a fingerprint.
    pub fingerprinted: usize,
    /// Records whose path was taken over by different bytes. Kept so their
    /// fingerprint survives if those bytes come back.
    pub detached: usize,
}
