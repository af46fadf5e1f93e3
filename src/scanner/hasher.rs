//! BLAKE3 content hasher with streaming support.
//!
//! # Overview
//!
//! The content hash is the durable identity of a track: two files with the
//! same bytes are the same track no matter where they live or what they are
//! called. Small files are streamed through a fixed buffer, large files are
//! memory-mapped and hashed with rayon.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::HashError;

/// Files at or above this size are memory-mapped instead of streamed.
pub const MMAP_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Read buffer for streamed hashing.
const BUFFER_SIZE: usize = 64 * 1024;

/// BLAKE3 digest of a file's raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// 64-character lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hash_to_hex(&self.0)
    }

    /// First 8 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Error returned when parsing a hex digest fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash: {0}")]
pub struct ParseHashError(pub String);

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex_to_hash(s)
            .map(Self)
            .ok_or_else(|| ParseHashError(s.to_string()))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert digest bytes to lowercase hex.
#[must_use]
pub fn hash_to_hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse 64 hex characters into digest bytes.
#[must_use]
pub fn hex_to_hash(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 || !hex.is_ascii() {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(out)
}

/// Streaming BLAKE3 hasher for audio files.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl ContentHasher {
    /// Create a new hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort long reads when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Hash the full content of a file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when the file cannot be opened or read, or when
    /// shutdown was requested mid-read.
    pub fn hash_file(&self, path: &Path) -> Result<ContentHash, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| HashError::from_io(path, e))?
            .len();

        let mut hasher = blake3::Hasher::new();
        if size >= MMAP_THRESHOLD {
            log::trace!("Hashing {} via mmap ({} bytes)", path.display(), size);
            hasher
                .update_mmap_rayon(path)
                .map_err(|e| HashError::from_io(path, e))?;
        } else {
            self.stream(file, &mut hasher)
                .map_err(|e| HashError::from_io(path, e))?;
        }
        Ok(ContentHash(*hasher.finalize().as_bytes()))
    }

    fn stream(&self, mut file: File, hasher: &mut blake3::Hasher) -> io::Result<()> {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            if self.is_shutdown_requested() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "shutdown"));
            }
            let read = match file.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
        }
    }
}
