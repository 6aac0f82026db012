//! Journal field encryption
//!
//! Only the `content` field of a journal entry is encrypted at rest. AES-GCM
//! output is randomized, so re-encrypting unchanged text on every save would
//! rewrite every entry. The encryptor keeps an in-memory cache of
//! `(content hash, ciphertext)` per entry id and reuses the ciphertext while
//! the plaintext hash still matches.
//!
//! Invariants:
//! - cache entries for ids absent from the journal being saved are evicted
//! - the cache is bound to one key; a different key clears it

use crate::security::{hash_sha256, DeviceKey};
use crate::Result;
use p21_core::{JournalEntry, PersistedJournalEntry};
use std::collections::{HashMap, HashSet};

/// How an entry's content came back from decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Content decrypted
    Decrypted,
    /// Content could not be decrypted; the entry carries empty content
    Failed {
        /// Error description
        reason: String,
    },
}

impl DecryptOutcome {
    /// Whether decryption failed
    pub fn is_failed(&self) -> bool {
        matches!(self, DecryptOutcome::Failed { .. })
    }
}

/// Decrypted journal entry with its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedEntry {
    /// Entry with plaintext content (empty on failure)
    pub entry: JournalEntry,
    /// Decryption outcome
    pub outcome: DecryptOutcome,
}

/// Cache counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Ciphertexts reused
    pub hits: u64,
    /// Entries encrypted afresh
    pub misses: u64,
    /// Stale ids dropped
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CachedCiphertext {
    content_hash: [u8; 32],
    ciphertext: String,
}

/// Per-entry journal content encryptor with ciphertext reuse
#[derive(Debug, Default)]
pub struct JournalEncryptor {
    cache: HashMap<String, CachedCiphertext>,
    key_fingerprint: Option<[u8; 32]>,
    stats: CacheStats,
}

impl JournalEncryptor {
    /// Create an empty encryptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt the content of every entry, reusing cached ciphertext for unchanged content
    pub fn encrypt_entries(
        &mut self,
        entries: &[JournalEntry],
        key: &DeviceKey,
    ) -> Result<Vec<PersistedJournalEntry>> {
        self.bind_key(key);

        let mut persisted = Vec::with_capacity(entries.len());
        for entry in entries {
            let hash = content_hash(&entry.content);
            let ciphertext = match self.cache.get(&entry.id) {
                Some(cached) if cached.content_hash == hash => {
                    self.stats.hits += 1;
                    cached.ciphertext.clone()
                }
                _ => {
                    self.stats.misses += 1;
                    let ciphertext = key.encrypt_str(&entry.content)?;
                    self.cache.insert(
                        entry.id.clone(),
                        CachedCiphertext {
                            content_hash: hash,
                            ciphertext: ciphertext.clone(),
                        },
                    );
                    ciphertext
                }
            };
            persisted.push(entry.to_persisted(ciphertext));
        }

        let live: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let before = self.cache.len();
        self.cache.retain(|id, _| live.contains(id.as_str()));
        let evicted = before - self.cache.len();
        if evicted > 0 {
            self.stats.evictions += evicted as u64;
            tracing::debug!("Evicted {} stale journal cache entries", evicted);
        }

        Ok(persisted)
    }

    /// Decrypt every entry, reporting per-entry outcomes
    ///
    /// A failed entry gets empty content and does not abort the rest.
    pub fn decrypt_entries_detailed(
        &mut self,
        entries: &[PersistedJournalEntry],
        key: &DeviceKey,
    ) -> Vec<DecryptedEntry> {
        self.bind_key(key);

        entries
            .iter()
            .map(|persisted| match key.decrypt_str(&persisted.encrypted_content) {
                Ok(content) => {
                    self.cache.insert(
                        persisted.id.clone(),
                        CachedCiphertext {
                            content_hash: content_hash(&content),
                            ciphertext: persisted.encrypted_content.clone(),
                        },
                    );
                    DecryptedEntry {
                        entry: persisted.to_entry(content),
                        outcome: DecryptOutcome::Decrypted,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to decrypt journal entry {}: {} ({})",
                        persisted.id,
                        e,
                        e.category()
                    );
                    self.cache.remove(&persisted.id);
                    DecryptedEntry {
                        entry: persisted.to_entry(String::new()),
                        outcome: DecryptOutcome::Failed {
                            reason: e.to_string(),
                        },
                    }
                }
            })
            .collect()
    }

    /// Decrypt every entry; failures collapse to empty content
    pub fn decrypt_entries(
        &mut self,
        entries: &[PersistedJournalEntry],
        key: &DeviceKey,
    ) -> Vec<JournalEntry> {
        self.decrypt_entries_detailed(entries, key)
            .into_iter()
            .map(|d| d.entry)
            .collect()
    }

    /// Drop every cached ciphertext
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Whether an id has a cached ciphertext
    pub fn contains(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn bind_key(&mut self, key: &DeviceKey) {
        let fingerprint = key.fingerprint();
        if self.key_fingerprint != Some(fingerprint) {
            if !self.cache.is_empty() {
                tracing::info!("Device key changed; clearing journal cache");
            }
            self.cache.clear();
            self.key_fingerprint = Some(fingerprint);
        }
    }
}

fn content_hash(content: &str) -> [u8; 32] {
    hash_sha256(content.as_bytes())
}
