//! Property-based tests for p21-core
//!
//! Uses proptest to verify invariants across randomized inputs

use p21_core::{
    sanitize_media_name, JournalEntry, JournalEntryType, Slot, Snapshot,
};
use proptest::prelude::*;

/// Path-ish references with separators, queries and fragments
fn reference_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_./\\\\?#=-]{0,64}").unwrap()
}

/// Journal text including unicode and control characters
fn content_strategy() -> impl Strategy<Value = String> {
    any::<String>()
}

proptest! {
    /// Property: a sanitized media name never carries a path separator
    #[test]
    fn prop_sanitized_name_has_no_path(reference in reference_strategy()) {
        if let Some(name) = sanitize_media_name(&reference) {
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.contains('\\'));
            prop_assert!(!name.contains('?'));
            prop_assert!(!name.is_empty());
        }
    }

    /// Property: snapshot JSON preserves journal content exactly
    #[test]
    fn prop_snapshot_json_preserves_content(content in content_strategy()) {
        let snapshot = Snapshot {
            journal: vec![JournalEntry {
                id: "j1".to_string(),
                timestamp: "2024-01-01T00:00:00.000Z".to_string(),
                timezone_offset: 120,
                entry_type: JournalEntryType::Text,
                emotions: vec!["tired".to_string()],
                content: content.clone(),
            }],
            ..Snapshot::default()
        };

        let json = serde_json::to_vec(&snapshot).unwrap();
        let parsed = Snapshot::from_json(&json).unwrap();
        prop_assert_eq!(&parsed.journal[0].content, &content);
    }
}

#[test]
fn test_slot_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Slot::Demo).unwrap(), "\"demo\"");
    assert_eq!(serde_json::from_str::<Slot>("\"live\"").unwrap(), Slot::Live);
}
