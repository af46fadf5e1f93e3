//! SQLite-backed fingerprint store.
//!
//! One `tracks` table keyed by content hash holds the path, tags and (once
//! computed) the acoustic fingerprint of every track ever seen. Each write is
//! committed on its own, so an interrupted run keeps every fingerprint it
//! finished.
//!
//! Pairwise similarity scores are derived data: they live in memory for the
//! duration of one run and are dropped with the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::entry::{StoreStats, TrackRecord};
use crate::scanner::{ContentHash, Fingerprint, Fingerprinter, TagField};

/// Current `PRAGMA user_version` of the schema.
pub const SCHEMA_VERSION: i32 = 1;

const IN_MEMORY: &str = ":memory:";

const SELECT_COLUMNS: &str = "content_hash, file_path, file_size, artist, title, album, \
     track_number, duration_secs, bitrate_kbps, fingerprint, fingerprint_secs";

/// Errors raised by the store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The database file cannot be used. Not recoverable: delete the file and
    /// rescan to rebuild it.
    #[error("fingerprint store {location} is unreadable: {reason}")]
    Corruption {
        /// Database file, or `:memory:`
        location: String,
        /// What was wrong
        reason: String,
    },

    /// The extractor could not fingerprint this track. The record stays in
    /// the store without a fingerprint.
    #[error("fingerprint unavailable for {path} ({hash}): {reason}")]
    FingerprintUnavailable {
        /// Content hash of the track
        hash: ContentHash,
        /// File that was read
        path: PathBuf,
        /// Extractor error
        reason: String,
    },

    /// No attached record with this content hash.
    #[error("no track with content hash {0}")]
    NotFound(ContentHash),

    /// Any other SQLite failure.
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// The store's directory could not be created.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Whether this error must stop the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent track store.
///
/// Shared across rayon workers behind an `Arc`; the connection is guarded by
/// a mutex so writes are serialized.
pub struct TrackStore {
    conn: Mutex<Connection>,
    location: String,
    scores: Mutex<HashMap<(ContentHash, ContentHash), f64>>,
    unavailable: Mutex<HashMap<ContentHash, String>>,
    computed: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl std::fmt::Debug for TrackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl TrackStore {
    /// Open or create the store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corruption`] when the file is not a usable database or
    /// was written by a newer schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let location = path.display().to_string();
        let conn = Connection::open(path).map_err(|e| classify(&location, e))?;
        Self::init(conn, location)
    }

    /// Store that lives only as long as the value. Used by tests.
    ///
    /// # Errors
    ///
    /// Only if SQLite itself fails to initialize.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| classify(IN_MEMORY, e))?;
        Self::init(conn, IN_MEMORY.to_string())
    }

    fn init(conn: Connection, location: String) -> StoreResult<Self> {
        configure(&conn).map_err(|e| classify(&location, e))?;
        migrate(&conn, &location)?;
        log::debug!("Opened fingerprint store at {}", location);
        Ok(Self {
            conn: Mutex::new(conn),
            location,
            scores: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(HashMap::new()),
            computed: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        })
    }

    /// Database file path, or `:memory:`.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn err(&self, e: rusqlite::Error) -> StoreError {
        classify(&self.location, e)
    }

    /// Attached record for `hash`, or `None`.
    ///
    /// # Errors
    ///
    /// Database failures, or [`StoreError::Corruption`] for undecodable rows.
    pub fn get(&self, hash: &ContentHash) -> StoreResult<Option<TrackRecord>> {
        let raw = {
            let conn = self.conn();
            conn.query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM tracks \
                     WHERE content_hash = ?1 AND file_path IS NOT NULL"
                ),
                params![hash.to_hex()],
                RawRow::from_row,
            )
            .optional()
            .map_err(|e| self.err(e))?
        };
        raw.map(|r| r.into_record(&self.location)).transpose()
    }

    /// Like [`get`](Self::get) but a missing record is an error.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no attached record exists.
    pub fn require(&self, hash: &ContentHash) -> StoreResult<TrackRecord> {
        self.get(hash)?.ok_or(StoreError::NotFound(*hash))
    }

    /// Insert or update a record.
    ///
    /// A stored fingerprint survives an update that carries none. A different
    /// record holding the same path is detached first: it keeps its
    /// fingerprint but no longer shows up in [`get`](Self::get) or
    /// [`all_records`](Self::all_records) until its bytes are seen again.
    ///
    /// # Errors
    ///
    /// Database failures.
    pub fn upsert(&self, record: &TrackRecord) -> StoreResult<()> {
        let hash = record.content_hash.to_hex();
        let path = path_to_text(&record.file_path);
        let now = chrono::Utc::now().to_rfc3339();
        let (blob, secs) = match &record.fingerprint {
            Some(fp) => (Some(fp.to_bytes()), Some(f64::from(fp.duration_secs))),
            None => (None, None),
        };

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(|e| self.err(e))?;

        let detached = tx
            .execute(
                "UPDATE tracks SET file_path = NULL, updated_at = ?3 \
                 WHERE file_path = ?1 AND content_hash <> ?2",
                params![path, hash, now],
            )
            .map_err(|e| self.err(e))?;
        if detached > 0 {
            log::debug!(
                "Content of {} changed, detached previous record",
                record.file_path.display()
            );
        }

        tx.execute(
            "INSERT INTO tracks (content_hash, file_path, file_size, artist, title, album, \
                 track_number, duration_secs, bitrate_kbps, fingerprint, fingerprint_secs, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(content_hash) DO UPDATE SET \
                 file_path = excluded.file_path, \
                 file_size = excluded.file_size, \
                 artist = excluded.artist, \
                 title = excluded.title, \
                 album = excluded.album, \
                 track_number = excluded.track_number, \
                 duration_secs = excluded.duration_secs, \
                 bitrate_kbps = excluded.bitrate_kbps, \
                 fingerprint = COALESCE(excluded.fingerprint, tracks.fingerprint), \
                 fingerprint_secs = COALESCE(excluded.fingerprint_secs, tracks.fingerprint_secs), \
                 updated_at = excluded.updated_at",
            params![
                hash,
                path,
                record.file_size as i64,
                record.artist.as_str(),
                record.title.as_str(),
                record.album.as_str(),
                record.track_number,
                record.duration_seconds,
                record.bitrate_kbps,
                blob,
                secs,
                now,
            ],
        )
        .map_err(|e| self.err(e))?;

        tx.commit().map_err(|e| self.err(e))
    }

    /// Fingerprint for `hash`, computing and storing it on a miss.
    ///
    /// A fingerprint already in the store is never recomputed, in this run
    /// or any later one. A track that failed once in this run fails again
    /// without another extraction attempt.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown hashes,
    /// [`StoreError::FingerprintUnavailable`] when extraction fails or times
    /// out, database failures on write-back.
    pub fn ensure_fingerprint(
        &self,
        hash: &ContentHash,
        fingerprinter: &Fingerprinter,
    ) -> StoreResult<Fingerprint> {
        let record = self.require(hash)?;
        if let Some(fp) = record.fingerprint {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("Fingerprint cache hit for {}", hash.short());
            return Ok(fp);
        }

        if let Some(reason) = self.unavailable_reason(hash) {
            return Err(StoreError::FingerprintUnavailable {
                hash: *hash,
                path: record.file_path,
                reason,
            });
        }

        match fingerprinter.extract(&record.file_path) {
            Ok(fp) => {
                self.store_fingerprint(hash, &fp)?;
                self.computed.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "Fingerprinted {} ({} points)",
                    record.file_path.display(),
                    fp.points.len()
                );
                Ok(fp)
            }
            Err(e) => {
                let reason = e.to_string();
                log::warn!(
                    "Cannot fingerprint {}: {}",
                    record.file_path.display(),
                    reason
                );
                self.unavailable
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(*hash, reason.clone());
                Err(StoreError::FingerprintUnavailable {
                    hash: *hash,
                    path: record.file_path,
                    reason,
                })
            }
        }
    }

    fn store_fingerprint(&self, hash: &ContentHash, fp: &Fingerprint) -> StoreResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE tracks SET fingerprint = ?1, fingerprint_secs = ?2, updated_at = ?3 \
                 WHERE content_hash = ?4",
                params![fp.to_bytes(), f64::from(fp.duration_secs), now, hash.to_hex()],
            )
            .map_err(|e| self.err(e))?;
        Ok(())
    }

    /// Why fingerprinting `hash` failed earlier in this run, if it did.
    #[must_use]
    pub fn unavailable_reason(&self, hash: &ContentHash) -> Option<String> {
        self.unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    /// Whether fingerprinting `hash` failed earlier in this run.
    #[must_use]
    pub fn is_unavailable(&self, hash: &ContentHash) -> bool {
        self.unavailable_reason(hash).is_some()
    }

    /// Remove a record and every score that references it.
    ///
    /// Returns `false` when no record had this hash.
    ///
    /// # Errors
    ///
    /// Database failures.
    pub fn delete(&self, hash: &ContentHash) -> StoreResult<bool> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM tracks WHERE content_hash = ?1",
                params![hash.to_hex()],
            )
            .map_err(|e| self.err(e))?;

        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(a, b), _| a != hash && b != hash);
        self.unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hash);

        Ok(removed > 0)
    }

    /// Remove every detached record: bytes that were replaced in place and
    /// never seen again. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Database failures, or corruption for an undecodable hash.
    pub fn prune_detached(&self) -> StoreResult<usize> {
        let hexes: Vec<String> = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare("SELECT content_hash FROM tracks WHERE file_path IS NULL")
                .map_err(|e| self.err(e))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| self.err(e))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.err(e))?
        };

        let mut pruned = 0;
        for hex in hexes {
            let hash = parse_hash(&hex, &self.location)?;
            if self.delete(&hash)? {
                pruned += 1;
            }
        }
        if pruned > 0 {
            log::debug!("Pruned {} detached records", pruned);
        }
        Ok(pruned)
    }

    /// Content hash of the record currently at `path`.
    ///
    /// # Errors
    ///
    /// Database failures, or corruption for an undecodable hash.
    pub fn lookup_path(&self, path: &Path) -> StoreResult<Option<ContentHash>> {
        let hex: Option<String> = self
            .conn()
            .query_row(
                "SELECT content_hash FROM tracks WHERE file_path = ?1",
                params![path_to_text(path)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| self.err(e))?;
        hex.map(|h| parse_hash(&h, &self.location)).transpose()
    }

    /// Every attached record, ordered by content hash.
    ///
    /// # Errors
    ///
    /// Database failures, or corruption for undecodable rows.
    pub fn all_records(&self) -> StoreResult<Vec<TrackRecord>> {
        let raws = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM tracks \
                     WHERE file_path IS NOT NULL ORDER BY content_hash"
                ))
                .map_err(|e| self.err(e))?;
            let rows = stmt
                .query_map([], RawRow::from_row)
                .map_err(|e| self.err(e))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.err(e))?
        };
        raws.into_iter()
            .map(|r| r.into_record(&self.location))
            .collect()
    }

    /// Score cached for the pair earlier in this run.
    #[must_use]
    pub fn cached_score(&self, a: &ContentHash, b: &ContentHash) -> Option<f64> {
        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pair_key(a, b))
            .copied()
    }

    /// Cache a score for the pair. Order of `a` and `b` does not matter.
    pub fn record_score(&self, a: &ContentHash, b: &ContentHash, value: f64) {
        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pair_key(a, b), value);
    }

    /// Number of cached pair scores.
    #[must_use]
    pub fn score_count(&self) -> usize {
        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Record counts.
    ///
    /// # Errors
    ///
    /// Database failures.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let (records, fingerprinted, detached): (i64, i64, i64) = self
            .conn()
            .query_row(
                "SELECT COUNT(file_path), \
                        COUNT(CASE WHEN file_path IS NOT NULL AND fingerprint IS NOT NULL THEN 1 END), \
                        COUNT(*) - COUNT(file_path) \
                 FROM tracks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| self.err(e))?;
        Ok(StoreStats {
            records: records as usize,
            fingerprinted: fingerprinted as usize,
            detached: detached as usize,
        })
    }

    /// Fingerprints held, attached or detached. Only ever decreases through
    /// [`delete`](Self::delete), [`prune_detached`](Self::prune_detached) or
    /// [`clear`](Self::clear).
    ///
    /// # Errors
    ///
    /// Database failures.
    pub fn fingerprint_count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM tracks WHERE fingerprint IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(|e| self.err(e))?;
        Ok(count as usize)
    }

    /// Fingerprints extracted by this store value.
    #[must_use]
    pub fn fingerprints_computed(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    /// Fingerprint requests answered from the store.
    #[must_use]
    pub fn fingerprint_cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Remove every record and cached score.
    ///
    /// # Errors
    ///
    /// Database failures.
    pub fn clear(&self) -> StoreResult<()> {
        self.conn()
            .execute("DELETE FROM tracks", [])
            .map_err(|e| self.err(e))?;
        self.scores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    /// Close the connection, reporting any error SQLite raises on close.
    ///
    /// # Errors
    ///
    /// Database failures.
    pub fn close(self) -> StoreResult<()> {
        let location = self.location;
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| classify(&location, e))
    }
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}

fn migrate(conn: &Connection, location: &str) -> StoreResult<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |r| r.get(0))
        .map_err(|e| classify(location, e))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::Corruption {
            location: location.to_string(),
            reason: format!(
                "schema version {version} is newer than supported version {SCHEMA_VERSION}"
            ),
        });
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS tracks (
            content_hash     TEXT PRIMARY KEY,
            file_path        TEXT UNIQUE,
            file_size        INTEGER NOT NULL,
            artist           TEXT,
            title            TEXT,
            album            TEXT,
            track_number     INTEGER,
            duration_secs    REAL,
            bitrate_kbps     INTEGER,
            fingerprint      BLOB,
            fingerprint_secs REAL,
            updated_at       TEXT NOT NULL
        );
        PRAGMA user_version = {SCHEMA_VERSION};"
    ))
    .map_err(|e| classify(location, e))
}

/// Map SQLite's "this is not a database" family to [`StoreError::Corruption`].
fn classify(location: &str, err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => StoreError::Corruption {
            location: location.to_string(),
            reason: err.to_string(),
        },
        _ => StoreError::Database(err),
    }
}

fn pair_key(a: &ContentHash, b: &ContentHash) -> (ContentHash, ContentHash) {
    if a <= b {
        (*a, *b)
    } else {
        (*b, *a)
    }
}

fn path_to_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse_hash(hex: &str, location: &str) -> StoreResult<ContentHash> {
    hex.parse().map_err(|_| StoreError::Corruption {
        location: location.to_string(),
        reason: format!("invalid content hash {hex:?}"),
    })
}

/// Row as read from SQLite, before validation.
struct RawRow {
    hash: String,
    path: Option<String>,
    size: i64,
    artist: Option<String>,
    title: Option<String>,
    album: Option<String>,
    track_number: Option<u32>,
    duration: Option<f64>,
    bitrate: Option<u32>,
    fingerprint: Option<Vec<u8>>,
    fingerprint_secs: Option<f64>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            hash: row.get(0)?,
            path: row.get(1)?,
            size: row.get(2)?,
            artist: row.get(3)?,
            title: row.get(4)?,
            album: row.get(5)?,
            track_number: row.get(6)?,
            duration: row.get(7)?,
            bitrate: row.get(8)?,
            fingerprint: row.get(9)?,
            fingerprint_secs: row.get(10)?,
        })
    }

    fn into_record(self, location: &str) -> StoreResult<TrackRecord> {
        let content_hash = parse_hash(&self.hash, location)?;
        let fingerprint = match self.fingerprint {
            Some(blob) => Some(
                Fingerprint::from_bytes(&blob, self.fingerprint_secs.unwrap_or(0.0) as f32)
                    .ok_or_else(|| StoreError::Corruption {
                        location: location.to_string(),
                        reason: format!("truncated fingerprint for {content_hash}"),
                    })?,
            ),
            None => None,
        };

        Ok(TrackRecord {
            content_hash,
            file_path: PathBuf::from(self.path.unwrap_or_default()),
            file_size: self.size.max(0) as u64,
            artist: TagField::from_option(self.artist),
            title: TagField::from_option(self.title),
            album: TagField::from_option(self.album),
            track_number: self.track_number,
            duration_seconds: self.duration,
            bitrate_kbps: self.bitrate,
            fingerprint,
        })
    }
}
