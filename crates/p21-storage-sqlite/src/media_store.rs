//! Media blob storage and restore
//!
//! Binary attachments live in their own SQLite file, one row per base
//! filename. Restoring an imported archive writes each file independently:
//! a failed write is reported and the rest continue.

use crate::archive::MediaSource;
use crate::{Error, Result};
use p21_core::{sanitize_media_name, MediaReference};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Filename-keyed binary store
pub trait BlobStore: Send + Sync {
    /// Insert or replace a blob
    fn put(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Fetch a blob by name
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// All stored names, sorted
    fn names(&self) -> Result<Vec<String>>;
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        (**self).put(name, data)
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(name)
    }

    fn names(&self) -> Result<Vec<String>> {
        (**self).names()
    }
}

/// Blob store backed by a SQLite file
pub struct SqliteBlobStore {
    conn: Mutex<Connection>,
}

impl SqliteBlobStore {
    /// Open (creating if absent) the blob store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!(
                    "Cannot create media directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            Error::StorageUnavailable(format!("Cannot open media store {}: {}", path.display(), e))
        })?;
        Self::init(conn)
    }

    /// Private in-memory blob store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StorageUnavailable(format!("Cannot open media store: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS media_blobs (
                filename TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl BlobStore for SqliteBlobStore {
    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO media_blobs (filename, data, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(filename) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![name, data, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM media_blobs WHERE filename = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT filename FROM media_blobs ORDER BY filename")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

/// Media file that could not be fetched or written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFailure {
    /// Base filename
    pub name: String,
    /// Error description
    pub reason: String,
}

/// Outcome of a media restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Files written
    pub restored: Vec<String>,
    /// Files that failed
    pub failed: Vec<MediaFailure>,
}

impl RestoreReport {
    /// Whether every file was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write every media file into the store produced by `open`
///
/// `open` is not called when `media` is empty. Per-file failures are
/// collected in the report; only a failure to open the store is an error.
pub fn restore_media<S, F>(media: &BTreeMap<String, Vec<u8>>, open: F) -> Result<RestoreReport>
where
    S: BlobStore,
    F: FnOnce() -> Result<S>,
{
    let mut report = RestoreReport::default();
    if media.is_empty() {
        return Ok(report);
    }

    let store = open()?;
    for (name, data) in media {
        let result = match sanitize_media_name(name) {
            Some(clean) if clean == *name => store.put(name, data),
            _ => Err(Error::Media(format!("Invalid media name: {:?}", name))),
        };
        match result {
            Ok(()) => report.restored.push(name.clone()),
            Err(e) => {
                tracing::warn!("Failed to restore media {}: {}", name, e);
                report.failed.push(MediaFailure {
                    name: name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Restored {} media files ({} failed)",
        report.restored.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Media restore into the blob store file at a fixed path
#[derive(Debug, Clone)]
pub struct MediaRestore {
    path: PathBuf,
}

impl MediaRestore {
    /// Restore target at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the blob store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert every file, creating the store only if there is something to write
    pub fn restore(&self, media: &BTreeMap<String, Vec<u8>>) -> Result<RestoreReport> {
        restore_media(media, || SqliteBlobStore::open(&self.path))
    }
}

/// Export media source reading from a blob store
pub struct BlobMediaSource<S> {
    store: S,
}

impl<S: BlobStore> BlobMediaSource<S> {
    /// Wrap a blob store
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: BlobStore> MediaSource for BlobMediaSource<S> {
    fn fetch(&self, reference: &MediaReference) -> Result<Vec<u8>> {
        self.store
            .get(&reference.name)?
            .ok_or_else(|| Error::Media(format!("{} not in media store", reference.name)))
    }
}
