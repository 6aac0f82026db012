//! Security and encryption primitives
//!
//! Implements the device-key cipher used for journal content: AES-256-GCM
//! with a fresh 96-bit nonce per message. Payloads are
//! `base64(nonce || ciphertext || tag)` so they can be stored as text.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Device key length in bytes
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Salt length used for password-derived keys
pub const SALT_LEN: usize = 16;

/// Long-lived symmetric key for on-device journal encryption
#[derive(Clone)]
pub struct DeviceKey {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl DeviceKey {
    /// Generate new random device key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(Error::MalformedInput(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);

        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    /// Decode from the base64 form kept in the key slot
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::MalformedInput(format!("Key is not valid base64: {}", e)))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Encode for the key slot
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key.as_slice())
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// SHA-256 of the key bytes, used to detect key changes
    pub fn fingerprint(&self) -> [u8; 32] {
        hash_sha256(self.key.as_slice())
    }

    /// Encrypt data into a self-describing base64 payload
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(payload))
    }

    /// Decrypt a payload produced by [`DeviceKey::encrypt`]
    pub fn decrypt(&self, payload: &str) -> Result<Vec<u8>> {
        let data = BASE64
            .decode(payload.trim())
            .map_err(|e| Error::MalformedInput(format!("Payload is not valid base64: {}", e)))?;

        if data.len() < NONCE_LEN {
            return Err(Error::MalformedInput(format!(
                "Payload shorter than nonce ({} < {})",
                data.len(),
                NONCE_LEN
            )));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()));
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::Authentication)
    }

    /// Encrypt a UTF-8 string
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt into a UTF-8 string
    pub fn decrypt_str(&self, payload: &str) -> Result<String> {
        let bytes = self.decrypt(payload)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::MalformedInput("Decrypted content is not UTF-8".to_string()))
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("fingerprint", &hex::encode(&self.fingerprint()[..4]))
            .finish()
    }
}

/// Encrypt `plaintext` under `key`
pub fn encrypt(plaintext: &[u8], key: &DeviceKey) -> Result<String> {
    key.encrypt(plaintext)
}

/// Decrypt `payload` under `key`
pub fn decrypt(payload: &str, key: &DeviceKey) -> Result<Vec<u8>> {
    key.decrypt(payload)
}

/// Generate secure random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Hash data with SHA-256
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
