// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Error types for marksync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration missing: {0}")]
    Configuration(String),

    #[error("Passphrase needed: no usable key material")]
    PassphraseNeeded,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Salt already exists on server")]
    SaltConflict,

    #[error("Decryption failed. Check passphrase or data integrity")]
    Decryption,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SyncError {
    /// Human-readable status string surfaced to the status observer.
    pub fn status_message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
