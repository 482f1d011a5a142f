// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Envelope encryption for sync payloads
//!
//! AES-256-GCM with a key derived from the shared passphrase via
//! PBKDF2-HMAC-SHA256. The wire form of an encrypted payload is
//! `base64(nonce || ciphertext)` with a fresh 12-byte random nonce drawn on
//! every encryption.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::models::EnvelopeBody;

pub const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

const KEY_EXPORT_ALGORITHM: &str = "AES-256-GCM";

// =============================================================================
// Salt
// =============================================================================

/// Generate a fresh 16-byte salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    rand::random()
}

/// Wire/storage form of a salt.
pub fn encode_salt(salt: &[u8]) -> String {
    BASE64.encode(salt)
}

pub fn decode_salt(encoded: &str) -> Result<Vec<u8>> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| SyncError::InvalidData(format!("Invalid salt encoding: {}", e)))?;
    if bytes.len() != SALT_SIZE {
        return Err(SyncError::InvalidData(format!(
            "Invalid salt length: {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

// =============================================================================
// Key Derivation and Export
// =============================================================================

/// Portable key export so the raw passphrase does not have to be retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExport {
    pub algorithm: String,
    pub key_b64: String,
}

/// Envelope cipher holding the derived symmetric key.
#[derive(Clone)]
pub struct EnvelopeCipher {
    key: Key<Aes256Gcm>,
}

impl EnvelopeCipher {
    /// Derive the key from (passphrase, salt). Deterministic: the same
    /// inputs always produce the same key on every device.
    pub fn derive(passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
            passphrase.as_bytes(),
            salt,
            PBKDF2_ITERATIONS,
            &mut key,
        );
        Self {
            key: *Key::<Aes256Gcm>::from_slice(&key),
        }
    }

    /// Export the derived key to its portable persisted form.
    pub fn export(&self) -> KeyExport {
        KeyExport {
            algorithm: KEY_EXPORT_ALGORITHM.to_string(),
            key_b64: BASE64.encode(self.key),
        }
    }

    /// Restore a cipher from a persisted export. Fails if the export is
    /// malformed, which invalidates it and requires a fresh passphrase.
    pub fn from_export(export: &KeyExport) -> Result<Self> {
        if export.algorithm != KEY_EXPORT_ALGORITHM {
            return Err(SyncError::InvalidData(format!(
                "Unsupported key algorithm: {}",
                export.algorithm
            )));
        }
        let bytes = BASE64
            .decode(&export.key_b64)
            .map_err(|e| SyncError::InvalidData(format!("Invalid key encoding: {}", e)))?;
        if bytes.len() != KEY_SIZE {
            return Err(SyncError::InvalidData(format!(
                "Invalid key length: {}",
                bytes.len()
            )));
        }
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        })
    }

    // =========================================================================
    // Encrypt / Decrypt
    // =========================================================================

    /// Encrypt raw bytes. A fresh random nonce is drawn per call and
    /// prepended to the ciphertext before base64 encoding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key);

        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SyncError::InvalidData("Encryption failed".to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt `base64(nonce || ciphertext)`. Any authentication or
    /// encoding failure maps to `SyncError::Decryption`, which is fatal for
    /// the sync cycle (wrong passphrase or corrupted data).
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let combined = BASE64.decode(encoded).map_err(|_| SyncError::Decryption)?;
        if combined.len() < NONCE_SIZE {
            return Err(SyncError::Decryption);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(&self.key);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SyncError::Decryption)
    }

    /// Encrypt a full envelope body (payload + client timestamp).
    pub fn encrypt_body(&self, body: &EnvelopeBody) -> Result<String> {
        let json = serde_json::to_vec(body)?;
        self.encrypt(&json)
    }

    /// Decrypt an encrypted envelope body.
    pub fn decrypt_body(&self, encoded: &str) -> Result<EnvelopeBody> {
        let plaintext = self.decrypt(encoded)?;
        serde_json::from_slice(&plaintext).map_err(|_| SyncError::Decryption)
    }
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("EnvelopeCipher").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
