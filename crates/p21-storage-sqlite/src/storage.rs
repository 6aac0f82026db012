//! Persistence facade
//!
//! Wires the key slot, snapshot database, save scheduler, archive codec and
//! media store for one data directory. This is the surface the host
//! application calls.

use crate::archive::{ArchiveCodec, ExportedArchive, ImportedArchive, MediaSource, NoMedia};
use crate::config::StorageConfig;
use crate::context::PersistenceContext;
use crate::keystore::FileKeySlot;
use crate::media_store::{BlobMediaSource, MediaRestore, RestoreReport, SqliteBlobStore};
use crate::save_scheduler::SaveScheduler;
use crate::state_store::StateStore;
use crate::Result;
use p21_core::{Slot, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Open persistence for one data directory
pub struct Storage {
    config: StorageConfig,
    store: Arc<StateStore>,
    scheduler: SaveScheduler,
    codec: ArchiveCodec,
    media: MediaRestore,
}

impl Storage {
    /// Open (creating on first use) everything under `config.data_dir`
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;

        let context = Arc::new(PersistenceContext::new(Arc::new(FileKeySlot::new(
            config.key_path(),
        ))));
        let store = Arc::new(StateStore::open(config.database_path(), context)?);
        let scheduler = SaveScheduler::new(store.clone(), config.save_debounce());

        tracing::info!("Opened storage at {}", config.data_dir.display());

        Ok(Self {
            codec: ArchiveCodec::new(config.archive_kdf),
            media: MediaRestore::new(config.media_path()),
            config,
            store,
            scheduler,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Snapshot store
    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Debounced save scheduler over the snapshot store
    pub fn scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }

    /// Load a slot's snapshot
    pub fn load_snapshot(&self, slot: Slot) -> Result<Option<Snapshot>> {
        self.store.load(slot)
    }

    /// Write a slot's snapshot immediately
    pub fn save_snapshot(&self, slot: Slot, snapshot: &Snapshot) -> Result<()> {
        self.store.save(slot, snapshot)
    }

    /// Export a slot as an encrypted archive, with media from the local blob store
    ///
    /// A slot that was never saved exports as an empty snapshot. An
    /// unreadable media store leaves every reference in `skipped_media`.
    pub fn export_archive(&self, slot: Slot, password: &str) -> Result<ExportedArchive> {
        let snapshot = self.store.load(slot)?.unwrap_or_default();
        let media_path = self.config.media_path();
        if !media_path.exists() {
            return self.export_with(&snapshot, password, &NoMedia);
        }
        match SqliteBlobStore::open(&media_path) {
            Ok(store) => self.export_with(&snapshot, password, &BlobMediaSource::new(store)),
            Err(e) => {
                tracing::warn!(
                    "Media store unreadable, exporting without media: {} ({})",
                    e,
                    e.category()
                );
                self.export_with(&snapshot, password, &NoMedia)
            }
        }
    }

    /// Export a snapshot with an explicit media source
    pub fn export_with(
        &self,
        snapshot: &Snapshot,
        password: &str,
        media: &dyn MediaSource,
    ) -> Result<ExportedArchive> {
        self.codec.export(snapshot, password, media)
    }

    /// Decrypt and unpack an archive; nothing is persisted
    pub fn import_archive(&self, bytes: &[u8], password: &str) -> Result<ImportedArchive> {
        self.codec.import(bytes, password)
    }

    /// Write media files into the local blob store
    pub fn restore_media(&self, media: &BTreeMap<String, Vec<u8>>) -> Result<RestoreReport> {
        self.media.restore(media)
    }

    /// Persist an imported archive into `slot` and restore its media
    ///
    /// The snapshot is written first; media failures do not undo it.
    pub fn commit_import(&self, slot: Slot, imported: &ImportedArchive) -> Result<RestoreReport> {
        self.store.save(slot, &imported.data)?;
        self.restore_media(&imported.media)
    }
}
