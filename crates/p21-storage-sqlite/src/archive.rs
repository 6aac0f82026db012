//! Password-protected backup archives (`.p21`)
//!
//! File layout:
//!
//! ```text
//! magic "P21A" | format u8 | m_cost u32 | t_cost u32 | p_cost u32 | salt [16] | nonce [12] | ciphertext
//! ```
//!
//! Integers are little-endian. Everything before the nonce is bound as
//! associated data. The plaintext is a zstd-compressed tar holding
//! `data.json` and one `media/<name>` entry per attachment.
//!
//! Every failure before `data.json` can be read (wrong password, truncation,
//! tampering, bad compression, bad tar) is reported as
//! [`Error::InvalidPasswordOrCorruptFile`]; the two cannot be told apart.

use crate::encryption::{ArchiveKey, KdfParams};
use crate::media_store::MediaFailure;
use crate::security::{generate_salt, NONCE_LEN, SALT_LEN};
use crate::{Error, Result};
use chrono::{NaiveDate, SecondsFormat, Utc};
use p21_core::{media_references, sanitize_media_name, MediaReference, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};

/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "p21";

/// Internal document version written by this codec
pub const ARCHIVE_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"P21A";
const CONTAINER_FORMAT: u8 = 1;
const AAD_LEN: usize = 4 + 1 + 4 * 3 + SALT_LEN;
const HEADER_LEN: usize = AAD_LEN + NONCE_LEN;
const TAG_LEN: usize = 16;
const ZSTD_LEVEL: i32 = 3;

const DATA_MEMBER: &str = "data.json";
const MEDIA_PREFIX: &str = "media/";

/// Source of media bytes during export
pub trait MediaSource {
    /// Fetch the bytes behind a media reference
    fn fetch(&self, reference: &MediaReference) -> Result<Vec<u8>>;
}

/// Media source that has nothing
pub struct NoMedia;

impl MediaSource for NoMedia {
    fn fetch(&self, reference: &MediaReference) -> Result<Vec<u8>> {
        Err(Error::Media(format!("{} unavailable", reference.name)))
    }
}

/// Media source reading files by base name from a directory
pub struct DirMediaSource {
    root: PathBuf,
}

impl DirMediaSource {
    /// Read media from `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl MediaSource for DirMediaSource {
    fn fetch(&self, reference: &MediaReference) -> Result<Vec<u8>> {
        let path = self.root.join(&reference.name);
        std::fs::read(&path).map_err(|e| Error::Media(format!("{}: {}", path.display(), e)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveDocument<'a> {
    version: u32,
    exported_at: &'a str,
    data: &'a Snapshot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveDocumentOwned {
    version: Option<serde_json::Value>,
    #[serde(default)]
    exported_at: Option<String>,
    data: Option<serde_json::Value>,
}

/// Result of an export
#[derive(Debug, Clone)]
pub struct ExportedArchive {
    /// Encrypted archive bytes
    pub bytes: Vec<u8>,
    /// Suggested file name
    pub file_name: String,
    /// Media files embedded
    pub included_media: Vec<String>,
    /// Media files that could not be fetched
    pub skipped_media: Vec<MediaFailure>,
}

/// Result of an import; nothing has been persisted yet
#[derive(Debug, Clone)]
pub struct ImportedArchive {
    /// Document version
    pub version: u32,
    /// Export timestamp as written by the exporter
    pub exported_at: Option<String>,
    /// Snapshot with plaintext journal content
    pub data: Snapshot,
    /// Media bytes by base filename
    pub media: BTreeMap<String, Vec<u8>>,
}

/// Suggested archive file name for an export date
pub fn archive_file_name(date: NaiveDate) -> String {
    format!("p21-backup-{}.{}", date.format("%Y-%m-%d"), ARCHIVE_EXTENSION)
}

/// Archive encoder/decoder
#[derive(Debug, Clone, Default)]
pub struct ArchiveCodec {
    kdf: KdfParams,
}

impl ArchiveCodec {
    /// Codec sealing new archives with `kdf`
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// KDF parameters used for new archives
    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Build an encrypted archive from a snapshot
    ///
    /// Theme, locale and assistant tone are reset. Media that cannot be
    /// fetched is left out and listed in the result.
    pub fn export(
        &self,
        snapshot: &Snapshot,
        password: &str,
        media: &dyn MediaSource,
    ) -> Result<ExportedArchive> {
        if password.is_empty() {
            return Err(Error::Validation("Archive password must not be empty".to_string()));
        }
        self.kdf.validate()?;

        let portable = Snapshot {
            settings: snapshot.settings.portable(),
            ..snapshot.clone()
        };
        let now = Utc::now();
        let exported_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let document = serde_json::to_vec(&ArchiveDocument {
            version: ARCHIVE_VERSION,
            exported_at: &exported_at,
            data: &portable,
        })?;

        let mut files = Vec::new();
        let mut skipped_media = Vec::new();
        for reference in media_references(&portable) {
            match media.fetch(&reference) {
                Ok(bytes) => files.push((reference.name, bytes)),
                Err(e) => {
                    tracing::warn!("Skipping media {} in export: {}", reference.name, e);
                    skipped_media.push(MediaFailure {
                        name: reference.name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let container = build_container(&document, &files)?;
        let compressed = zstd::stream::encode_all(Cursor::new(container), ZSTD_LEVEL)?;
        let bytes = seal(&compressed, password, &self.kdf)?;

        let included_media: Vec<String> = files.into_iter().map(|(name, _)| name).collect();
        tracing::info!(
            "Exported archive: {} bytes, {} media files ({} skipped)",
            bytes.len(),
            included_media.len(),
            skipped_media.len()
        );

        Ok(ExportedArchive {
            bytes,
            file_name: archive_file_name(now.date_naive()),
            included_media,
            skipped_media,
        })
    }

    /// Decrypt and unpack an archive without persisting anything
    pub fn import(&self, bytes: &[u8], password: &str) -> Result<ImportedArchive> {
        let compressed = open(bytes, password)?;
        let container = zstd::stream::decode_all(Cursor::new(compressed))
            .map_err(|_| Error::InvalidPasswordOrCorruptFile)?;
        let (document, media) = read_container(&container)?;

        let document = document
            .ok_or_else(|| Error::InvalidArchiveFormat(format!("{} missing", DATA_MEMBER)))?;
        let parsed: ArchiveDocumentOwned = serde_json::from_slice(&document)
            .map_err(|e| Error::InvalidArchiveFormat(format!("{} unreadable: {}", DATA_MEMBER, e)))?;

        let version = match parsed.version {
            Some(v) if v.as_u64() == Some(u64::from(ARCHIVE_VERSION)) => ARCHIVE_VERSION,
            Some(v) => {
                return Err(Error::InvalidArchiveFormat(format!(
                    "Unsupported archive version {}",
                    v
                )))
            }
            None => {
                return Err(Error::InvalidArchiveFormat(
                    "Archive version missing".to_string(),
                ))
            }
        };

        let data = parsed
            .data
            .ok_or_else(|| Error::InvalidArchiveFormat("Archive data missing".to_string()))?;
        let data: Snapshot = serde_json::from_value(data)
            .map_err(|e| Error::InvalidArchiveFormat(format!("Archive data invalid: {}", e)))?;

        tracing::info!(
            "Imported archive v{}: {} habits, {} journal entries, {} media files",
            version,
            data.habits.len(),
            data.journal.len(),
            media.len()
        );

        Ok(ImportedArchive {
            version,
            exported_at: parsed.exported_at,
            data,
            media,
        })
    }
}

/// Export with default KDF parameters
pub fn export_archive(
    snapshot: &Snapshot,
    password: &str,
    media: &dyn MediaSource,
) -> Result<ExportedArchive> {
    ArchiveCodec::default().export(snapshot, password, media)
}

/// Import an archive
pub fn import_archive(bytes: &[u8], password: &str) -> Result<ImportedArchive> {
    ArchiveCodec::default().import(bytes, password)
}

fn build_container(document: &[u8], media: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut tar_data = Vec::new();
    {
        let mut builder = Builder::new(Cursor::new(&mut tar_data));
        builder.mode(tar::HeaderMode::Deterministic);

        append_file(&mut builder, DATA_MEMBER, document)?;
        for (name, bytes) in media {
            append_file(&mut builder, &format!("{}{}", MEDIA_PREFIX, name), bytes)?;
        }
        builder.finish()?;
    }
    Ok(tar_data)
}

fn append_file<W: std::io::Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(data.len() as u64);
    header.set_cksum();
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

type Container = (Option<Vec<u8>>, BTreeMap<String, Vec<u8>>);

fn read_container(tar_payload: &[u8]) -> Result<Container> {
    let corrupt = |_| Error::InvalidPasswordOrCorruptFile;

    let mut archive = tar::Archive::new(Cursor::new(tar_payload));
    let mut document = None;
    let mut media = BTreeMap::new();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let path = entry
            .path()
            .map_err(corrupt)?
            .to_string_lossy()
            .into_owned();

        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer).map_err(corrupt)?;

        if path == DATA_MEMBER {
            document = Some(buffer);
        } else if let Some(rest) = path.strip_prefix(MEDIA_PREFIX) {
            match sanitize_media_name(rest) {
                Some(name) => {
                    media.insert(name, buffer);
                }
                None => tracing::debug!("Ignoring media entry {:?}", path),
            }
        }
    }

    Ok((document, media))
}

fn encode_header(kdf: &KdfParams, salt: &[u8; SALT_LEN]) -> [u8; AAD_LEN] {
    let mut header = [0u8; AAD_LEN];
    header[..4].copy_from_slice(MAGIC);
    header[4] = CONTAINER_FORMAT;
    header[5..9].copy_from_slice(&kdf.memory_kib.to_le_bytes());
    header[9..13].copy_from_slice(&kdf.iterations.to_le_bytes());
    header[13..17].copy_from_slice(&kdf.parallelism.to_le_bytes());
    header[17..].copy_from_slice(salt);
    header
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn seal(plaintext: &[u8], password: &str, kdf: &KdfParams) -> Result<Vec<u8>> {
    let salt = generate_salt();
    let header = encode_header(kdf, &salt);
    let key = ArchiveKey::derive(password, &salt, kdf)?;
    let (nonce, ciphertext) = key.seal(plaintext, &header)?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    if bytes.len() < HEADER_LEN + TAG_LEN || &bytes[..4] != MAGIC || bytes[4] != CONTAINER_FORMAT {
        return Err(Error::InvalidPasswordOrCorruptFile);
    }

    let kdf = KdfParams {
        memory_kib: read_u32(bytes, 5),
        iterations: read_u32(bytes, 9),
        parallelism: read_u32(bytes, 13),
    };
    if let Err(e) = kdf.validate() {
        tracing::debug!("Rejecting archive header: {}", e);
        return Err(Error::InvalidPasswordOrCorruptFile);
    }

    let (header, rest) = bytes.split_at(AAD_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let salt = &header[17..];

    let key = ArchiveKey::derive(password, salt, &kdf).map_err(|_| Error::InvalidPasswordOrCorruptFile)?;
    let plaintext = key
        .open(nonce, ciphertext, header)
        .map_err(|_| Error::InvalidPasswordOrCorruptFile)?;
    if plaintext.is_empty() {
        return Err(Error::InvalidPasswordOrCorruptFile);
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p21_core::{Anchor, AnchorType, JournalEntry, JournalEntryType};

    fn codec() -> ArchiveCodec {
        ArchiveCodec::new(KdfParams::interactive())
    }

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.settings.theme = "midnight".to_string();
        snapshot.journal.push(JournalEntry {
            id: "j1".to_string(),
            timestamp: "2024-05-04T21:00:00.000Z".to_string(),
            timezone_offset: 0,
            entry_type: JournalEntryType::Audio,
            emotions: vec![],
            content: "recordings/voice-1.webm".to_string(),
        });
        snapshot.stop_crane.push(Anchor {
            id: "a1".to_string(),
            anchor_type: AnchorType::Image,
            content: "data:image/png;base64,AAAA".to_string(),
            created_at: 1,
        });
        snapshot
    }

    struct MapSource(BTreeMap<String, Vec<u8>>);

    impl MediaSource for MapSource {
        fn fetch(&self, reference: &MediaReference) -> Result<Vec<u8>> {
            self.0
                .get(&reference.name)
                .cloned()
                .ok_or_else(|| Error::Media("missing".to_string()))
        }
    }

    fn seal_document(document: &serde_json::Value) -> Vec<u8> {
        let container = build_container(&serde_json::to_vec(document).unwrap(), &[]).unwrap();
        let compressed = zstd::stream::encode_all(Cursor::new(container), ZSTD_LEVEL).unwrap();
        seal(&compressed, "pw", &KdfParams::interactive()).unwrap()
    }

    #[test]
    fn test_round_trip_resets_device_settings() {
        let source = MapSource(
            [("voice-1.webm".to_string(), b"opus".to_vec())]
                .into_iter()
                .collect(),
        );
        let exported = codec().export(&snapshot(), "pw", &source).unwrap();
        assert_eq!(exported.included_media, vec!["voice-1.webm".to_string()]);

        let imported = codec().import(&exported.bytes, "pw").unwrap();
        assert_eq!(imported.version, ARCHIVE_VERSION);
        assert_eq!(imported.data.settings.theme, p21_core::DEFAULT_THEME);
        assert_eq!(imported.data.journal, snapshot().journal);
        assert_eq!(imported.media["voice-1.webm"], b"opus");
        assert!(imported.exported_at.is_some());
    }

    #[test]
    fn test_inline_data_is_not_media() {
        let exported = codec().export(&snapshot(), "pw", &NoMedia).unwrap();
        assert!(exported.included_media.is_empty());
        assert_eq!(exported.skipped_media.len(), 1);
        assert_eq!(exported.skipped_media[0].name, "voice-1.webm");
    }

    #[test]
    fn test_output_hides_plaintext() {
        let exported = codec().export(&snapshot(), "pw", &NoMedia).unwrap();
        assert_eq!(&exported.bytes[..4], MAGIC);
        let haystack = String::from_utf8_lossy(&exported.bytes);
        assert!(!haystack.contains("voice-1"));
    }

    #[test]
    fn test_empty_password_rejected_on_export() {
        assert!(matches!(
            codec().export(&snapshot(), "", &NoMedia),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_failures_share_one_error() {
        let exported = codec().export(&snapshot(), "pw", &NoMedia).unwrap();
        let bytes = exported.bytes;

        assert!(matches!(codec().import(&bytes, "other"), Err(Error::InvalidPasswordOrCorruptFile)));
        assert!(matches!(codec().import(&bytes[..bytes.len() - 1], "pw"), Err(Error::InvalidPasswordOrCorruptFile)));
        assert!(matches!(codec().import(&[], "pw"), Err(Error::InvalidPasswordOrCorruptFile)));
        assert!(matches!(codec().import(b"not an archive at all, just text......", "pw"), Err(Error::InvalidPasswordOrCorruptFile)));

        let mut tampered = bytes.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(codec().import(&tampered, "pw"), Err(Error::InvalidPasswordOrCorruptFile)));

        let mut salt_flipped = bytes.clone();
        salt_flipped[20] ^= 0x80;
        assert!(matches!(codec().import(&salt_flipped, "pw"), Err(Error::InvalidPasswordOrCorruptFile)));
    }

    #[test]
    fn test_oversized_kdf_header_rejected() {
        let exported = codec().export(&snapshot(), "pw", &NoMedia).unwrap();
        let mut bytes = exported.bytes;
        bytes[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(codec().import(&bytes, "pw"), Err(Error::InvalidPasswordOrCorruptFile)));
    }

    #[test]
    fn test_non_container_plaintext_is_corrupt() {
        let bytes = seal(b"plain bytes, not zstd", "pw", &KdfParams::interactive()).unwrap();
        assert!(matches!(codec().import(&bytes, "pw"), Err(Error::InvalidPasswordOrCorruptFile)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let bytes = seal_document(&serde_json::json!({
            "version": 2,
            "exportedAt": "2024-01-01T00:00:00.000Z",
            "data": {}
        }));
        assert!(matches!(codec().import(&bytes, "pw"), Err(Error::InvalidArchiveFormat(_))));
    }

    #[test]
    fn test_non_integer_version_is_unsupported() {
        for version in [serde_json::json!(1.0), serde_json::json!("1"), serde_json::json!(-1)] {
            let bytes = seal_document(&serde_json::json!({ "version": version, "data": {} }));
            match codec().import(&bytes, "pw") {
                Err(Error::InvalidArchiveFormat(message)) => {
                    assert!(message.starts_with("Unsupported archive version"), "{}", message)
                }
                other => panic!("unexpected result: {:?}", other.map(|a| a.version)),
            }
        }
    }

    #[test]
    fn test_missing_version_rejected() {
        let bytes = seal_document(&serde_json::json!({ "data": {} }));
        assert!(matches!(codec().import(&bytes, "pw"), Err(Error::InvalidArchiveFormat(_))));
    }

    #[test]
    fn test_missing_document_rejected() {
        let mut tar_data = Vec::new();
        {
            let mut builder = Builder::new(Cursor::new(&mut tar_data));
            append_file(&mut builder, "media/x.png", b"png").unwrap();
            builder.finish().unwrap();
        }
        let compressed = zstd::stream::encode_all(Cursor::new(tar_data), ZSTD_LEVEL).unwrap();
        let bytes = seal(&compressed, "pw", &KdfParams::interactive()).unwrap();
        assert!(matches!(codec().import(&bytes, "pw"), Err(Error::InvalidArchiveFormat(_))));
    }

    #[test]
    fn test_directory_entries_are_skipped() {
        let document = serde_json::to_vec(&serde_json::json!({
            "version": 1,
            "exportedAt": "2024-01-01T00:00:00.000Z",
            "data": {}
        }))
        .unwrap();
        let mut tar_data = Vec::new();
        {
            let mut builder = Builder::new(Cursor::new(&mut tar_data));
            let mut dir = Header::new_gnu();
            dir.set_entry_type(EntryType::Directory);
            dir.set_mode(0o755);
            dir.set_size(0);
            dir.set_cksum();
            builder
                .append_data(&mut dir, "media/", Cursor::new(Vec::new()))
                .unwrap();
            append_file(&mut builder, DATA_MEMBER, &document).unwrap();
            append_file(&mut builder, "media/a.png", b"a").unwrap();
            builder.finish().unwrap();
        }
        let compressed = zstd::stream::encode_all(Cursor::new(tar_data), ZSTD_LEVEL).unwrap();
        let bytes = seal(&compressed, "pw", &KdfParams::interactive()).unwrap();

        let imported = codec().import(&bytes, "pw").unwrap();
        assert_eq!(imported.media.len(), 1);
        assert_eq!(imported.media["a.png"], b"a");
        assert_eq!(imported.data, Snapshot::default());
    }

    #[test]
    fn test_file_name() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(archive_file_name(date), "p21-backup-2024-03-09.p21");
    }
}
