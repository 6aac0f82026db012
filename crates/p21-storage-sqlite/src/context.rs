//! Persistence context
//!
//! Owns the device key store and the journal encryption caches for one host
//! application. Constructed once at startup and handed to the state store;
//! dropping it discards every cache.

use crate::journal_crypto::{CacheStats, DecryptedEntry, JournalEncryptor};
use crate::keystore::{KeySlot, KeyStore, MemoryKeySlot};
use crate::security::DeviceKey;
use crate::Result;
use p21_core::{JournalEntry, PersistedJournalEntry, Slot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Key store plus one journal cache per slot
pub struct PersistenceContext {
    keys: KeyStore,
    // Slots hold unrelated journals; a shared cache would evict across them.
    journals: Mutex<HashMap<Slot, JournalEncryptor>>,
}

impl PersistenceContext {
    /// Create a context over a key slot
    pub fn new(slot: Arc<dyn KeySlot>) -> Self {
        Self {
            keys: KeyStore::new(slot),
            journals: Mutex::new(HashMap::new()),
        }
    }

    /// Context with an ephemeral in-memory key
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeySlot::new()))
    }

    /// Underlying key store
    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Current device key, clearing every journal cache if it changed
    pub fn current_key(&self) -> Result<DeviceKey> {
        let lookup = self.keys.lookup()?;
        if lookup.changed {
            self.reset_caches();
        }
        Ok(lookup.key)
    }

    /// Encrypt a slot's journal for storage
    pub fn encrypt_journal(
        &self,
        slot: Slot,
        entries: &[JournalEntry],
    ) -> Result<Vec<PersistedJournalEntry>> {
        let key = self.current_key()?;
        let mut journals = self.journals.lock();
        journals
            .entry(slot)
            .or_default()
            .encrypt_entries(entries, &key)
    }

    /// Decrypt a slot's stored journal, reporting per-entry outcomes
    pub fn decrypt_journal(
        &self,
        slot: Slot,
        entries: &[PersistedJournalEntry],
    ) -> Result<Vec<DecryptedEntry>> {
        let key = self.current_key()?;
        let mut journals = self.journals.lock();
        Ok(journals
            .entry(slot)
            .or_default()
            .decrypt_entries_detailed(entries, &key))
    }

    /// Cache counters for a slot
    pub fn cache_stats(&self, slot: Slot) -> CacheStats {
        self.journals
            .lock()
            .get(&slot)
            .map(JournalEncryptor::stats)
            .unwrap_or_default()
    }

    /// Number of cached ciphertexts for a slot
    pub fn cached_entries(&self, slot: Slot) -> usize {
        self.journals.lock().get(&slot).map_or(0, JournalEncryptor::len)
    }

    /// Drop every cached ciphertext
    pub fn reset_caches(&self) {
        for encryptor in self.journals.lock().values_mut() {
            encryptor.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeySlot;
    use p21_core::JournalEntryType;

    fn entry(id: &str, content: &str) -> JournalEntry {
        JournalEntry {
            id: id.to_string(),
            timestamp: "2024-05-04T21:00:00.000Z".to_string(),
            timezone_offset: -120,
            entry_type: JournalEntryType::Text,
            emotions: Vec::new(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_slots_have_independent_caches() {
        let ctx = PersistenceContext::in_memory();
        ctx.encrypt_journal(Slot::Live, &[entry("a", "live")]).unwrap();
        ctx.encrypt_journal(Slot::Demo, &[entry("b", "demo")]).unwrap();

        assert_eq!(ctx.cached_entries(Slot::Live), 1);
        assert_eq!(ctx.cached_entries(Slot::Demo), 1);
        assert_eq!(ctx.cache_stats(Slot::Live).evictions, 0);
    }

    #[test]
    fn test_external_key_replacement_clears_caches() {
        let slot = Arc::new(MemoryKeySlot::new());
        let ctx = PersistenceContext::new(slot.clone());
        let journal = vec![entry("a", "hello")];

        let first = ctx.encrypt_journal(Slot::Live, &journal).unwrap();
        let replacement = DeviceKey::generate();
        slot.write(&replacement.to_base64()).unwrap();

        let second = ctx.encrypt_journal(Slot::Live, &journal).unwrap();
        assert_ne!(first[0].encrypted_content, second[0].encrypted_content);
        assert_eq!(
            replacement.decrypt_str(&second[0].encrypted_content).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_decrypt_then_encrypt_is_cache_hit() {
        let ctx = PersistenceContext::in_memory();
        let stored = ctx.encrypt_journal(Slot::Live, &[entry("a", "x")]).unwrap();

        let fresh = PersistenceContext::new(Arc::new(MemoryKeySlot::with_value(
            ctx.key_store().cached_key().unwrap().to_base64(),
        )));
        let decrypted = fresh.decrypt_journal(Slot::Live, &stored).unwrap();
        let entries: Vec<_> = decrypted.into_iter().map(|d| d.entry).collect();
        let resaved = fresh.encrypt_journal(Slot::Live, &entries).unwrap();

        assert_eq!(resaved[0].encrypted_content, stored[0].encrypted_content);
        assert_eq!(fresh.cache_stats(Slot::Live).hits, 1);
    }
}
