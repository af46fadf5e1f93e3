//! Embedded tag reading.
//!
//! [`TagReader`] yields a [`TrackTags`] for any path and never fails: an
//! unreadable or untagged file simply comes back with every field
//! [`TagField::Missing`], and the grouper then keeps it out of comparisons.

use std::fmt;
use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;
use serde::{Deserialize, Serialize};

/// A text tag that is either present or missing.
///
/// Blank text is normalized to `Missing`, so a tag consisting of spaces can
/// never create a cluster key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "value")]
pub enum TagField {
    /// Tag text as found in the file.
    Present(String),
    /// Tag absent, unreadable or blank.
    #[default]
    Missing,
}

impl TagField {
    /// Build from text, treating whitespace-only text as missing.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.trim().is_empty() {
            Self::Missing
        } else {
            Self::Present(text)
        }
    }

    /// Build from an optional text value.
    #[must_use]
    pub fn from_option<S: Into<String>>(value: Option<S>) -> Self {
        value.map_or(Self::Missing, Self::new)
    }

    /// Text if present.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Present(s) => Some(s),
            Self::Missing => None,
        }
    }

    /// Whether the tag is missing.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(s) => f.write_str(s),
            Self::Missing => f.write_str("<missing>"),
        }
    }
}

/// Metadata read from a file's embedded tags and stream properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackTags {
    pub artist: TagField,
    pub title: TagField,
    pub album: TagField,
    pub track_number: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<u32>,
}

impl TrackTags {
    /// Tags with every field missing.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }
}

/// Reads tags from an audio file.
pub trait TagReader: Send + Sync {
    /// Read tags. Unreadable files yield [`TrackTags::missing`].
    fn read_tags(&self, path: &Path) -> TrackTags;
}

/// [`TagReader`] backed by lofty (ID3v1/v2, MP4 atoms, Vorbis comments, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> TrackTags {
        let tagged = match Probe::open(path).and_then(|probe| probe.read()) {
            Ok(tagged) => tagged,
            Err(e) => {
                log::warn!("Cannot read tags from {}: {}", path.display(), e);
                return TrackTags::missing();
            }
        };

        let properties = tagged.properties();
        let duration = properties.duration().as_secs_f64();
        let mut tags = TrackTags {
            duration_seconds: (duration > 0.0).then_some(duration),
            bitrate_kbps: properties.audio_bitrate(),
            ..TrackTags::default()
        };

        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            tags.artist = TagField::from_option(tag.artist().map(|s| s.into_owned()));
            tags.title = TagField::from_option(tag.title().map(|s| s.into_owned()));
            tags.album = TagField::from_option(tag.album().map(|s| s.into_owned()));
            tags.track_number = tag.track();
        } else {
            log::debug!("No tags in {}", path.display());
        }

        tags
    }
}
