//! Snapshot storage with retry/backoff for SQLITE_BUSY
//!
//! Each slot holds exactly one record: the whole snapshot as JSON, with
//! journal content replaced by ciphertext. Saves overwrite the record inside
//! a single transaction so readers see the old record or the new one.

use crate::context::PersistenceContext;
use crate::database::Database;
use crate::journal_crypto::DecryptOutcome;
use crate::save_scheduler::SnapshotWriter;
use crate::{Error, Result};
use p21_core::{PersistedSnapshot, Slot, Snapshot};
use parking_lot::Mutex;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

/// Journal entry whose content could not be decrypted on load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalFailure {
    /// Entry id
    pub id: String,
    /// Error description
    pub reason: String,
}

/// Snapshot loaded together with its per-entry decryption failures
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    /// Snapshot with failed entries carrying empty content
    pub snapshot: Snapshot,
    /// Entries that failed to decrypt
    pub failures: Vec<JournalFailure>,
}

/// Slot-keyed snapshot store
pub struct StateStore {
    db: Mutex<Database>,
    context: Arc<PersistenceContext>,
}

impl StateStore {
    /// Create a store over an open database
    pub fn new(db: Database, context: Arc<PersistenceContext>) -> Self {
        Self {
            db: Mutex::new(db),
            context,
        }
    }

    /// Open the database at `path` and create a store over it
    pub fn open<P: AsRef<Path>>(path: P, context: Arc<PersistenceContext>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?, context))
    }

    /// Persistence context used for journal encryption
    pub fn context(&self) -> &Arc<PersistenceContext> {
        &self.context
    }

    /// Load a slot's snapshot, `None` if the slot was never saved
    pub fn load(&self, slot: Slot) -> Result<Option<Snapshot>> {
        Ok(self.load_detailed(slot)?.map(|loaded| loaded.snapshot))
    }

    /// Load a slot's snapshot and report entries that failed to decrypt
    pub fn load_detailed(&self, slot: Slot) -> Result<Option<LoadedSnapshot>> {
        let persisted = match self.load_raw(slot)? {
            Some(persisted) => persisted,
            None => return Ok(None),
        };

        let decrypted = self.context.decrypt_journal(slot, &persisted.journal)?;
        let mut failures = Vec::new();
        let mut journal = Vec::with_capacity(decrypted.len());
        for item in decrypted {
            if let DecryptOutcome::Failed { reason } = item.outcome {
                failures.push(JournalFailure {
                    id: item.entry.id.clone(),
                    reason,
                });
            }
            journal.push(item.entry);
        }

        if !failures.is_empty() {
            tracing::warn!(
                "Loaded {} slot with {} undecryptable journal entries",
                slot,
                failures.len()
            );
        }

        Ok(Some(LoadedSnapshot {
            snapshot: persisted.into_snapshot(journal),
            failures,
        }))
    }

    /// Stored record for a slot, journal content still encrypted
    pub fn load_raw(&self, slot: Slot) -> Result<Option<PersistedSnapshot>> {
        let db = self.db.lock();
        let record: Option<String> = with_busy_retry(|| {
            Ok(db
                .conn()
                .query_row(
                    "SELECT record FROM snapshots WHERE slot = ?1",
                    params![slot.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Encrypt the journal and overwrite the slot's record
    pub fn save(&self, slot: Slot, snapshot: &Snapshot) -> Result<()> {
        let journal = self.context.encrypt_journal(slot, &snapshot.journal)?;
        let record = serde_json::to_string(&snapshot.to_persisted(journal))?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let mut db = self.db.lock();
        with_busy_retry(|| {
            let tx = db.transaction()?;
            tx.execute(
                "INSERT INTO snapshots (slot, record, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(slot) DO UPDATE SET
                    record = excluded.record,
                    updated_at = excluded.updated_at",
                params![slot.as_str(), record, updated_at],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        tracing::debug!(
            "Saved {} slot ({} habits, {} journal entries, {} bytes)",
            slot,
            snapshot.habits.len(),
            snapshot.journal.len(),
            record.len()
        );
        Ok(())
    }

    /// Delete a slot's record, returning whether one existed
    pub fn clear(&self, slot: Slot) -> Result<bool> {
        let db = self.db.lock();
        let removed = with_busy_retry(|| {
            Ok(db
                .conn()
                .execute("DELETE FROM snapshots WHERE slot = ?1", params![slot.as_str()])?)
        })?;
        Ok(removed > 0)
    }

    /// Last write time of a slot (RFC 3339)
    pub fn updated_at(&self, slot: Slot) -> Result<Option<String>> {
        let db = self.db.lock();
        with_busy_retry(|| {
            Ok(db
                .conn()
                .query_row(
                    "SELECT updated_at FROM snapshots WHERE slot = ?1",
                    params![slot.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

impl SnapshotWriter for StateStore {
    fn write_snapshot(&self, slot: Slot, snapshot: &Snapshot) -> Result<()> {
        self.save(slot, snapshot)
    }
}

/// Run `f`, retrying while SQLite reports the database busy
fn with_busy_retry<T, F>(mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempts = 0;

    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                attempts += 1;
                let backoff = calculate_backoff(attempts);
                tracing::debug!(
                    "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                    attempts,
                    MAX_BUSY_RETRIES,
                    backoff
                );
                thread::sleep(Duration::from_millis(backoff));
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy,
                ..
            },
            _
        )
    )
}

/// Calculate exponential backoff with jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}
