// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Key management: salt bootstrap and key material lifecycle
//!
//! The salt bootstrap is optimistic first-writer-wins: among any number of
//! racing first-time clients exactly one salt value ever becomes
//! authoritative on the server, and every client converges to it. The
//! derived key is exported for persistence so the raw passphrase can be
//! erased immediately after a successful derivation.

use crate::crypto::{decode_salt, encode_salt, generate_salt, EnvelopeCipher};
use crate::error::{Result, SyncError};
use crate::store::LocalStore;
use crate::transport::{SaltUpload, SyncTransport};

pub struct KeyManager<'a> {
    store: &'a LocalStore,
    transport: &'a dyn SyncTransport,
}

impl<'a> KeyManager<'a> {
    pub fn new(store: &'a LocalStore, transport: &'a dyn SyncTransport) -> Self {
        Self { store, transport }
    }

    // =========================================================================
    // Salt bootstrap
    // =========================================================================

    /// Establish the authoritative salt, converging with the server.
    ///
    /// 1. A salt on the server is adopted unconditionally (remote is
    ///    authoritative; the local cache is overwritten if it differs).
    /// 2. A local-only salt is offered with a non-forcing upload; a 409
    ///    means another client won the race, so refetch and adopt.
    /// 3. With no salt anywhere, generate 16 random bytes, persist, upload;
    ///    again a 409 means refetch and adopt.
    pub async fn ensure_salt(&self) -> Result<Vec<u8>> {
        let local = self.store.salt()?;

        let fetched = match self.transport.fetch_salt().await {
            Ok(fetched) => fetched,
            Err(e) if local.is_some() => {
                // Offline bootstrap: an established local salt still works
                log::warn!("Failed to fetch salt from server, using local: {}", e);
                return decode_salt(local.as_deref().unwrap());
            }
            Err(e) => return Err(e),
        };

        if let Some(remote_salt) = fetched {
            if local.as_deref() != Some(remote_salt.as_str()) {
                log::info!("Updating local salt to match server");
                self.store.set_salt(&remote_salt)?;
            }
            return decode_salt(&remote_salt);
        }

        if let Some(local_salt) = local {
            log::info!("Server has no salt, uploading local salt");
            match self.transport.upload_salt(&local_salt, false).await? {
                SaltUpload::Accepted => decode_salt(&local_salt),
                SaltUpload::AlreadyExists => self.adopt_after_conflict().await,
            }
        } else {
            let new_salt = encode_salt(&generate_salt());
            log::info!("No salt found locally or on server, generated new salt");
            self.store.set_salt(&new_salt)?;
            match self.transport.upload_salt(&new_salt, false).await? {
                SaltUpload::Accepted => decode_salt(&new_salt),
                SaltUpload::AlreadyExists => self.adopt_after_conflict().await,
            }
        }
    }

    /// A 409 on upload means another client established the salt first;
    /// fetch the winning value and adopt it.
    async fn adopt_after_conflict(&self) -> Result<Vec<u8>> {
        log::info!("Salt conflict during upload, re-fetching from server");
        match self.transport.fetch_salt().await? {
            Some(remote_salt) => {
                self.store.set_salt(&remote_salt)?;
                decode_salt(&remote_salt)
            }
            None => Err(SyncError::SaltConflict),
        }
    }

    /// Generate a fresh salt and force it onto the server, discarding
    /// whatever was there. Used only by the reset-and-overwrite flow.
    pub async fn reset_salt(&self) -> Result<Vec<u8>> {
        let new_salt = encode_salt(&generate_salt());
        match self.transport.upload_salt(&new_salt, true).await? {
            SaltUpload::Accepted => {}
            SaltUpload::AlreadyExists => return Err(SyncError::SaltConflict),
        }
        self.store.set_salt(&new_salt)?;
        decode_salt(&new_salt)
    }

    // =========================================================================
    // Key derivation / restore
    // =========================================================================

    /// Produce a usable cipher from whatever key material is available.
    ///
    /// A pending passphrase takes precedence: derive, persist the export,
    /// then erase the passphrase from storage. Otherwise restore from the
    /// persisted export; a restore failure invalidates the export and
    /// requires a fresh passphrase.
    pub async fn ensure_key(&self) -> Result<EnvelopeCipher> {
        let passphrase = self.store.passphrase()?;

        if let Some(passphrase) = passphrase {
            let salt = self.ensure_salt().await?;
            let cipher = EnvelopeCipher::derive(&passphrase, &salt);
            self.store.set_key_export(&cipher.export())?;
            self.store.remove_passphrase()?;
            log::info!("Derived encryption key and erased raw passphrase");
            return Ok(cipher);
        }

        match self.store.key_export()? {
            Some(export) => match EnvelopeCipher::from_export(&export) {
                Ok(cipher) => Ok(cipher),
                Err(e) => {
                    log::error!("Failed to restore key from stored export: {}", e);
                    self.store.remove_key_export()?;
                    Err(SyncError::PassphraseNeeded)
                }
            },
            None => Err(SyncError::PassphraseNeeded),
        }
    }

    /// Derive a key directly from a passphrase against a known salt,
    /// persisting the export. Used by the reset flow where the salt was
    /// just regenerated.
    pub fn derive_and_store(&self, passphrase: &str, salt: &[u8]) -> Result<EnvelopeCipher> {
        let cipher = EnvelopeCipher::derive(passphrase, salt);
        self.store.set_key_export(&cipher.export())?;
        self.store.remove_passphrase()?;
        Ok(cipher)
    }
}

// =============================================================================
// Tests
// =============================================================================
