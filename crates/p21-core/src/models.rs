//! Snapshot models
//!
//! Field names serialize in camelCase to match the records the application
//! layer produces. Only the journal `content` field is ever encrypted; the
//! persisted form of a journal entry carries `encryptedContent` instead.

use crate::settings::Settings;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Habit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    /// Habit ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Accent color
    #[serde(default)]
    pub color: String,
    /// Pinned as priority
    #[serde(default)]
    pub is_priority: bool,
    /// Completions needed per day
    #[serde(default = "default_daily_target")]
    pub daily_target: u32,
    /// Category label
    #[serde(default)]
    pub category: Option<String>,
    /// Created timestamp (ms since epoch)
    pub created_at: i64,
    /// Archived flag
    #[serde(default)]
    pub archived: bool,
}

fn default_daily_target() -> u32 {
    1
}

/// Completion status for a habit on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Daily target reached
    Completed,
    /// Some progress below target
    Partial,
    /// Deliberately skipped
    Skipped,
    /// Not done
    Missed,
}

/// Per-habit, per-date completion record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitLog {
    /// Habit the log belongs to
    pub habit_id: String,
    /// Calendar date ("YYYY-MM-DD")
    pub date: String,
    /// Completion status
    pub status: LogStatus,
    /// Completions recorded
    #[serde(default)]
    pub count: u32,
}

/// Journal entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalEntryType {
    /// Free text
    Text,
    /// Audio recording; content is a filename or URL
    Audio,
}

/// Journal entry as seen by the application (plaintext content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Stable entry ID
    pub id: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
    /// Timezone offset in minutes at time of writing
    #[serde(default)]
    pub timezone_offset: i32,
    /// Entry type
    #[serde(rename = "type")]
    pub entry_type: JournalEntryType,
    /// Emotion tags
    #[serde(default)]
    pub emotions: Vec<String>,
    /// Free text or audio reference
    #[serde(default)]
    pub content: String,
}

impl JournalEntry {
    /// Convert into the persisted form with the given ciphertext
    pub fn to_persisted(&self, encrypted_content: String) -> PersistedJournalEntry {
        PersistedJournalEntry {
            id: self.id.clone(),
            timestamp: self.timestamp.clone(),
            timezone_offset: self.timezone_offset,
            entry_type: self.entry_type,
            emotions: self.emotions.clone(),
            encrypted_content,
        }
    }
}

/// Journal entry as stored on device (content encrypted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedJournalEntry {
    /// Stable entry ID
    pub id: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
    /// Timezone offset in minutes at time of writing
    #[serde(default)]
    pub timezone_offset: i32,
    /// Entry type
    #[serde(rename = "type")]
    pub entry_type: JournalEntryType,
    /// Emotion tags
    #[serde(default)]
    pub emotions: Vec<String>,
    /// Base64 nonce-prefixed ciphertext of the content
    pub encrypted_content: String,
}

impl PersistedJournalEntry {
    /// Convert back into an application entry with the given plaintext
    pub fn to_entry(&self, content: String) -> JournalEntry {
        JournalEntry {
            id: self.id.clone(),
            timestamp: self.timestamp.clone(),
            timezone_offset: self.timezone_offset,
            entry_type: self.entry_type,
            emotions: self.emotions.clone(),
            content,
        }
    }
}

/// Anchor (grounding aid) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorType {
    /// Text reminder
    Text,
    /// External link
    Link,
    /// Image; content is a filename, URL or inline data URI
    Image,
    /// Audio clip
    Audio,
    /// Radio stream
    Radio,
    /// Stop exercise
    Stop,
}

/// Anchor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// Anchor ID
    pub id: String,
    /// Anchor type
    #[serde(rename = "type")]
    pub anchor_type: AnchorType,
    /// Content (text, URL, filename)
    #[serde(default)]
    pub content: String,
    /// Created timestamp (ms since epoch)
    pub created_at: i64,
}

/// Full application snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// User preferences
    #[serde(default)]
    pub settings: Settings,
    /// Habits, in display order
    #[serde(default)]
    pub habits: Vec<Habit>,
    /// Completion logs
    #[serde(default)]
    pub logs: Vec<HabitLog>,
    /// Journal entries
    #[serde(default)]
    pub journal: Vec<JournalEntry>,
    /// Anchors
    #[serde(default)]
    pub stop_crane: Vec<Anchor>,
}

impl Snapshot {
    /// Parse a snapshot from its JSON form
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Persisted form, with journal entries supplied by the encryptor
    pub fn to_persisted(&self, journal: Vec<PersistedJournalEntry>) -> PersistedSnapshot {
        PersistedSnapshot {
            settings: self.settings.clone(),
            habits: self.habits.clone(),
            logs: self.logs.clone(),
            journal,
            stop_crane: self.stop_crane.clone(),
        }
    }
}

/// Snapshot as stored in a slot record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    /// User preferences
    #[serde(default)]
    pub settings: Settings,
    /// Habits, in display order
    #[serde(default)]
    pub habits: Vec<Habit>,
    /// Completion logs
    #[serde(default)]
    pub logs: Vec<HabitLog>,
    /// Journal entries with encrypted content
    #[serde(default)]
    pub journal: Vec<PersistedJournalEntry>,
    /// Anchors
    #[serde(default)]
    pub stop_crane: Vec<Anchor>,
}

impl PersistedSnapshot {
    /// Application snapshot, with journal entries supplied by the decryptor
    pub fn into_snapshot(self, journal: Vec<JournalEntry>) -> Snapshot {
        Snapshot {
            settings: self.settings,
            habits: self.habits,
            logs: self.logs,
            journal,
            stop_crane: self.stop_crane,
        }
    }
}
