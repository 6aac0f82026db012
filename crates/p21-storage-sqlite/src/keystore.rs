//! Device key storage
//!
//! A single 256-bit key encrypts all journal content on this install. It is
//! generated on first use, persisted base64-encoded in a key slot that lives
//! alongside the database, and reused for the life of the install. Losing
//! the slot makes existing journal ciphertext unrecoverable.

use crate::security::DeviceKey;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Namespaced name of the device key slot
pub const DEVICE_KEY_SLOT: &str = "p21:journal-encryption-key";

/// Default key file name inside the data directory
pub const DEFAULT_KEY_FILE: &str = "p21.journal-key";

/// Single-value persistent slot holding the encoded device key
pub trait KeySlot: Send + Sync {
    /// Read the stored value, `None` when the slot is empty
    fn read(&self) -> Result<Option<String>>;

    /// Replace the stored value
    fn write(&self, value: &str) -> Result<()>;

    /// Empty the slot
    fn clear(&self) -> Result<()>;
}

/// In-memory key slot for tests and ephemeral hosts
#[derive(Default)]
pub struct MemoryKeySlot {
    value: RwLock<Option<String>>,
}

impl MemoryKeySlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot pre-populated with a value
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: RwLock::new(Some(value.into())),
        }
    }
}

impl KeySlot for MemoryKeySlot {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.value.read().clone())
    }

    fn write(&self, value: &str) -> Result<()> {
        *self.value.write() = Some(value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.value.write() = None;
        Ok(())
    }
}

/// Key slot backed by a single file, replaced atomically on write
pub struct FileKeySlot {
    path: PathBuf,
}

impl FileKeySlot {
    /// Slot at an explicit path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Slot at the default file name inside `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_KEY_FILE))
    }

    /// Path of the key file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, action: &str, err: io::Error) -> Error {
        Error::StorageUnavailable(format!(
            "Failed to {} key slot {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}

impl KeySlot for FileKeySlot {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.unavailable("read", e)),
        }
    }

    fn write(&self, value: &str) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| self.unavailable("create directory for", e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.unavailable("stage", e))?;
        tmp.write_all(value.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| self.unavailable("write", e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.unavailable("persist", e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.unavailable("clear", e)),
        }
    }
}

/// Result of a key lookup
#[derive(Debug, Clone)]
pub struct KeyLookup {
    /// Current device key
    pub key: DeviceKey,
    /// Key was generated by this lookup
    pub created: bool,
    /// Key differs from the one previously seen by this store
    pub changed: bool,
}

/// Generate-once, reuse-forever access to the device key
pub struct KeyStore {
    slot: Arc<dyn KeySlot>,
    cached: Mutex<Option<DeviceKey>>,
}

impl KeyStore {
    /// Create a key store over a slot
    pub fn new(slot: Arc<dyn KeySlot>) -> Self {
        Self {
            slot,
            cached: Mutex::new(None),
        }
    }

    /// Return the persisted key, generating and persisting one if absent
    pub fn get_or_create_key(&self) -> Result<DeviceKey> {
        Ok(self.lookup()?.key)
    }

    /// Like [`KeyStore::get_or_create_key`], also reporting creation and changes
    ///
    /// The slot is re-read on every call so a key cleared or replaced
    /// outside this process is noticed.
    pub fn lookup(&self) -> Result<KeyLookup> {
        let mut cached = self.cached.lock();

        match self.slot.read()? {
            Some(encoded) => {
                let key = DeviceKey::from_base64(&encoded)?;
                let changed = cached
                    .as_ref()
                    .is_some_and(|c| c.fingerprint() != key.fingerprint());
                if changed {
                    tracing::warn!("Device key changed outside this session");
                }
                *cached = Some(key.clone());
                Ok(KeyLookup {
                    key,
                    created: false,
                    changed,
                })
            }
            None => {
                let key = DeviceKey::generate();
                self.slot.write(&key.to_base64())?;
                let changed = cached.is_some();
                tracing::info!("Generated new device key (slot {})", DEVICE_KEY_SLOT);
                *cached = Some(key.clone());
                Ok(KeyLookup {
                    key,
                    created: true,
                    changed,
                })
            }
        }
    }

    /// Key seen by the last lookup, without touching the slot
    pub fn cached_key(&self) -> Option<DeviceKey> {
        self.cached.lock().clone()
    }
}
