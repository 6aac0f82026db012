//! Media references
//!
//! Audio journal entries and image anchors point at binary media by
//! filename or URL. Inline `data:` URIs carry their bytes in the record
//! itself and are not references.

use crate::models::{AnchorType, JournalEntryType, Snapshot};
use std::collections::BTreeSet;

/// A binary attachment referenced from a snapshot record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    /// Base filename used as the media key
    pub name: String,
    /// Reference exactly as stored in the record
    pub reference: String,
}

/// Whether a content value points at external media
pub fn is_media_reference(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.starts_with("data:") {
        return false;
    }
    if trimmed.contains('\n') {
        return false;
    }
    sanitize_media_name(trimmed).is_some()
}

/// Base filename of a reference: query and fragment dropped, path prefix stripped
pub fn sanitize_media_name(reference: &str) -> Option<String> {
    let without_fragment = reference.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let name = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Media manifest of a snapshot, deduplicated by base filename
pub fn media_references(snapshot: &Snapshot) -> Vec<MediaReference> {
    let journal = snapshot
        .journal
        .iter()
        .filter(|entry| entry.entry_type == JournalEntryType::Audio)
        .map(|entry| entry.content.as_str());
    let anchors = snapshot
        .stop_crane
        .iter()
        .filter(|anchor| anchor.anchor_type == AnchorType::Image)
        .map(|anchor| anchor.content.as_str());

    let mut seen = BTreeSet::new();
    let mut references = Vec::new();
    for content in journal.chain(anchors) {
        if !is_media_reference(content) {
            continue;
        }
        let reference = content.trim();
        let Some(name) = sanitize_media_name(reference) else {
            continue;
        };
        if seen.insert(name.clone()) {
            references.push(MediaReference {
                name,
                reference: reference.to_string(),
            });
        }
    }
    references
}
