//! Encrypted local persistence for P21
//!
//! Stores the application snapshot in SQLite under two independent slots,
//! encrypts journal content with a per-install device key, and produces and
//! consumes password-protected `.p21` backup archives.
//!
//! ## Security Features
//!
//! - **Journal Encryption**: AES-256-GCM per entry, device key generated once per install
//! - **Ciphertext Reuse**: unchanged entries keep their ciphertext between saves
//! - **Archive Encryption**: ChaCha20-Poly1305 under an Argon2id password key
//!   (64 MiB memory, 3 iterations, 4 lanes by default)
//! - **No Password Oracle**: wrong password and corrupt archive fail identically

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod config;
pub mod context;
pub mod database;
pub mod encryption;
pub mod error;
pub mod journal_crypto;
pub mod keystore;
pub mod media_store;
pub mod migrations;
pub mod save_scheduler;
pub mod security;
pub mod state_store;
pub mod storage;

pub use archive::{
    archive_file_name, export_archive, import_archive, ArchiveCodec, DirMediaSource,
    ExportedArchive, ImportedArchive, MediaSource, NoMedia, ARCHIVE_EXTENSION, ARCHIVE_VERSION,
};
pub use config::StorageConfig;
pub use context::PersistenceContext;
pub use database::Database;
pub use encryption::{ArchiveKey, KdfParams};
pub use error::{Error, ErrorCategory, Result};
pub use journal_crypto::{CacheStats, DecryptOutcome, DecryptedEntry, JournalEncryptor};
pub use keystore::{FileKeySlot, KeyLookup, KeySlot, KeyStore, MemoryKeySlot, DEVICE_KEY_SLOT};
pub use media_store::{
    restore_media, BlobMediaSource, BlobStore, MediaFailure, MediaRestore, RestoreReport,
    SqliteBlobStore,
};
pub use save_scheduler::{SaveScheduler, SchedulerState, SnapshotWriter};
pub use security::{decrypt, encrypt, DeviceKey};
pub use state_store::{JournalFailure, LoadedSnapshot, StateStore};
pub use storage::Storage;
