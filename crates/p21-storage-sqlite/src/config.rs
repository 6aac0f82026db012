//! Storage configuration
//!
//! Loaded from an optional `config.json` in the data directory, then
//! overridden by `P21_DATA_DIR` and `P21_SAVE_DEBOUNCE_MS`. An explicit
//! directory passed to `load_in` takes the place of `P21_DATA_DIR`.

use crate::encryption::KdfParams;
use crate::keystore::DEFAULT_KEY_FILE;
use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "P21_DATA_DIR";

/// Environment variable overriding the save debounce
pub const SAVE_DEBOUNCE_ENV: &str = "P21_SAVE_DEBOUNCE_MS";

/// Config file name inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the database, media store and key file
    pub data_dir: PathBuf,
    /// Snapshot database file name
    pub database_file: String,
    /// Media blob store file name
    pub media_file: String,
    /// Device key file name
    pub key_file: String,
    /// Quiet period before a scheduled save is written
    pub save_debounce_ms: u64,
    /// Argon2id costs for new archives
    pub archive_kdf: KdfParams,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: "p21.db".to_string(),
            media_file: "p21-media.db".to_string(),
            key_file: DEFAULT_KEY_FILE.to_string(),
            save_debounce_ms: 300,
            archive_kdf: KdfParams::default(),
        }
    }
}

impl StorageConfig {
    /// Defaults rooted at `dir`
    pub fn with_data_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            data_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Resolve configuration from the environment and `config.json`
    pub fn load() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Like [`StorageConfig::load`] with an explicit variable lookup
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup(DATA_DIR_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        Self::resolve(data_dir, lookup)
    }

    /// Resolve configuration for an explicit data directory
    ///
    /// `config.json` is read from `dir`; `P21_DATA_DIR` is ignored.
    pub fn load_in<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::resolve(dir.as_ref().to_path_buf(), |name| std::env::var(name).ok())
    }

    fn resolve<F>(data_dir: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = data_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        config.data_dir = data_dir;

        if let Some(raw) = lookup(SAVE_DEBOUNCE_ENV) {
            config.save_debounce_ms = raw.trim().parse().map_err(|_| {
                Error::Validation(format!("{} must be milliseconds, got {:?}", SAVE_DEBOUNCE_ENV, raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Read a config file; missing fields take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        tracing::debug!("Loaded storage config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check file names and KDF costs
    pub fn validate(&self) -> Result<()> {
        for (field, name) in [
            ("database_file", &self.database_file),
            ("media_file", &self.media_file),
            ("key_file", &self.key_file),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(Error::Validation(format!(
                    "{} must be a plain file name, got {:?}",
                    field, name
                )));
            }
        }
        if self.database_file == self.media_file {
            return Err(Error::Validation(
                "database_file and media_file must differ".to_string(),
            ));
        }
        self.archive_kdf.validate()
    }

    /// Snapshot database path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Media blob store path
    pub fn media_path(&self) -> PathBuf {
        self.data_dir.join(&self.media_file)
    }

    /// Device key file path
    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join(&self.key_file)
    }

    /// Save debounce as a duration
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("app", "P21", "P21")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StorageConfig::with_data_dir("/tmp/p21");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/p21/p21.db"));
        assert_eq!(config.media_path(), PathBuf::from("/tmp/p21/p21-media.db"));
        assert_eq!(config.key_path(), PathBuf::from("/tmp/p21/p21.journal-key"));
        assert_eq!(config.save_debounce(), Duration::from_millis(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::load_with(env(&[
            (DATA_DIR_ENV, dir.path().to_str().unwrap()),
            (SAVE_DEBOUNCE_ENV, "25"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.save_debounce_ms, 25);
    }

    #[test]
    fn test_config_file_then_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "database_file": "custom.db", "save_debounce_ms": 1000 }"#,
        )
        .unwrap();

        let config =
            StorageConfig::load_with(env(&[(DATA_DIR_ENV, dir.path().to_str().unwrap())])).unwrap();
        assert_eq!(config.database_file, "custom.db");
        assert_eq!(config.save_debounce_ms, 1000);
        assert_eq!(config.media_file, "p21-media.db");
        assert_eq!(config.data_dir, dir.path());

        let config = StorageConfig::load_with(env(&[
            (DATA_DIR_ENV, dir.path().to_str().unwrap()),
            (SAVE_DEBOUNCE_ENV, "10"),
        ]))
        .unwrap();
        assert_eq!(config.save_debounce_ms, 10);
    }

    #[test]
    fn test_explicit_dir_reads_its_own_config() {
        let env_dir = TempDir::new().unwrap();
        std::fs::write(
            env_dir.path().join(CONFIG_FILE),
            r#"{ "database_file": "elsewhere.db" }"#,
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{ "database_file": "custom.db" }"#)
            .unwrap();

        let config = StorageConfig::resolve(
            dir.path().to_path_buf(),
            env(&[(DATA_DIR_ENV, env_dir.path().to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.database_path(), dir.path().join("custom.db"));

        let bare = TempDir::new().unwrap();
        let config = StorageConfig::load_in(bare.path()).unwrap();
        assert_eq!(config.database_path(), bare.path().join("p21.db"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let bad_debounce = StorageConfig::load_with(env(&[
            (DATA_DIR_ENV, dir.path().to_str().unwrap()),
            (SAVE_DEBOUNCE_ENV, "soon"),
        ]));
        assert!(matches!(bad_debounce, Err(Error::Validation(_))));

        let config = StorageConfig {
            key_file: "../key".to_string(),
            ..StorageConfig::with_data_dir(dir.path())
        };
        assert!(config.validate().is_err());
    }
}
