//! P21 core data model
//!
//! This crate defines the application snapshot persisted by the storage
//! layer: settings, habits, completion logs, journal entries and anchors,
//! together with the storage slot selector and the helpers used to locate
//! binary media referenced from journal and anchor records.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod media;
pub mod models;
pub mod settings;
pub mod slot;

pub use error::{Error, Result};
pub use media::{is_media_reference, media_references, sanitize_media_name, MediaReference};
pub use models::{
    Anchor, AnchorType, Habit, HabitLog, JournalEntry, JournalEntryType, LogStatus,
    PersistedJournalEntry, PersistedSnapshot, Snapshot,
};
pub use settings::{
    NotificationSettings, Settings, DEFAULT_ASSISTANT_TONE, DEFAULT_LOCALE, DEFAULT_THEME,
};
pub use slot::Slot;
