//! Password-derived keys for backup archives
//!
//! Archives are sealed with ChaCha20-Poly1305 under a key derived from the
//! export password with Argon2id. The KDF costs travel in the archive header
//! so an archive can always be opened with the password alone.

use crate::security::{KEY_LEN, NONCE_LEN, SALT_LEN};
use crate::{Error, Result};
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Iterations
    pub iterations: u32,
    /// Parallel lanes
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Memory: 64 MiB (65536 KiB), Iterations: 3, Parallelism: 4
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Upper bound on memory accepted from an archive header (1 GiB)
    pub const MAX_MEMORY_KIB: u32 = 1 << 20;

    /// Upper bound on iterations accepted from an archive header
    pub const MAX_ITERATIONS: u32 = 64;

    /// Upper bound on lanes accepted from an archive header
    pub const MAX_PARALLELISM: u32 = 64;

    /// Cheap parameters for tests and interactive tooling
    pub fn interactive() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Check the parameters are usable and within bounds
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 || self.parallelism > Self::MAX_PARALLELISM {
            return Err(Error::Validation(format!(
                "KDF parallelism out of range: {}",
                self.parallelism
            )));
        }
        if self.iterations == 0 || self.iterations > Self::MAX_ITERATIONS {
            return Err(Error::Validation(format!(
                "KDF iterations out of range: {}",
                self.iterations
            )));
        }
        if self.memory_kib < 8 * self.parallelism || self.memory_kib > Self::MAX_MEMORY_KIB {
            return Err(Error::Validation(format!(
                "KDF memory out of range: {} KiB",
                self.memory_kib
            )));
        }
        Ok(())
    }
}

/// Derive raw key bytes from a password using Argon2id.
pub fn derive_key_bytes(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; KEY_LEN]> {
    if salt.len() < SALT_LEN {
        return Err(Error::Encryption("Salt too short".to_string()));
    }
    params.validate()?;

    let params = ParamsBuilder::new()
        .m_cost(params.memory_kib)
        .t_cost(params.iterations)
        .p_cost(params.parallelism)
        .output_len(KEY_LEN)
        .build()
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut *key)
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&key[..]);
    Ok(out)
}

/// Archive encryption key
pub struct ArchiveKey(Zeroizing<[u8; KEY_LEN]>);

impl ArchiveKey {
    /// Derive from password using Argon2id + salt
    pub fn derive(password: &str, salt: &[u8], params: &KdfParams) -> Result<Self> {
        let key = derive_key_bytes(password, salt, params)?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Encrypt with a fresh nonce, binding `aad`
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.0.as_slice()));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok((nonce_bytes, ciphertext))
    }

    /// Decrypt and authenticate
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::MalformedInput("Invalid nonce length".to_string()));
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.0.as_slice()));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| Error::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::generate_salt;

    #[test]
    fn test_key_derivation_is_deterministic() {
        let salt = generate_salt();
        let params = KdfParams::interactive();
        let key1 = ArchiveKey::derive("passphrase", &salt, &params).unwrap();
        let key2 = ArchiveKey::derive("passphrase", &salt, &params).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_salt_produces_different_key() {
        let params = KdfParams::interactive();
        let key1 = ArchiveKey::derive("same", &generate_salt(), &params).unwrap();
        let key2 = ArchiveKey::derive("same", &generate_salt(), &params).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_salt_minimum_length() {
        let params = KdfParams::interactive();
        assert!(derive_key_bytes("pw", &[0u8; 15], &params).is_err());
        assert!(derive_key_bytes("pw", &[0u8; 16], &params).is_ok());
    }

    #[test]
    fn test_seal_open_with_aad() {
        let key = ArchiveKey::derive("pw", &generate_salt(), &KdfParams::interactive()).unwrap();
        let (nonce, ciphertext) = key.seal(b"container", b"header").unwrap();

        assert_eq!(key.open(&nonce, &ciphertext, b"header").unwrap(), b"container");
        assert!(matches!(
            key.open(&nonce, &ciphertext, b"other header"),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_param_bounds() {
        assert!(KdfParams::default().validate().is_ok());
        assert!(KdfParams::interactive().validate().is_ok());

        let too_much_memory = KdfParams {
            memory_kib: KdfParams::MAX_MEMORY_KIB + 1,
            ..KdfParams::default()
        };
        assert!(too_much_memory.validate().is_err());

        let no_lanes = KdfParams {
            parallelism: 0,
            ..KdfParams::default()
        };
        assert!(no_lanes.validate().is_err());
    }

    #[test]
    fn test_default_parameters() {
        let params = KdfParams::default();
        assert_eq!(params.memory_kib, 65536);
        assert_eq!(params.iterations, 3);
        assert_eq!(params.parallelism, 4);
    }
}
