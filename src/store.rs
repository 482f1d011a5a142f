// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Local persistent key-value store (SQLite)
//!
//! Holds everything that must survive process restarts: server URL, salt,
//! key export, device id, the last known applied server timestamp, and the
//! tab records synced from other devices.

use crate::crypto::KeyExport;
use crate::error::Result;
use crate::models::TabRecord;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const KEY_SERVER_URL: &str = "serverUrl";
const KEY_SALT: &str = "cryptoSalt";
const KEY_PASSPHRASE: &str = "passphrase";
const KEY_EXPORT: &str = "cryptoKeyExport";
const KEY_BROWSER_ID: &str = "syncBrowserId";
const KEY_LAST_SERVER_TIMESTAMP: &str = "lastKnownServerTimestamp";
const KEY_REMOTE_TABS: &str = "syncedRemoteTabs";

/// Default store location under the platform data directory.
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marksync")
        .join("marksync.db")
}

/// SQLite-backed key-value store.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Raw key-value access
    // =========================================================================

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM ItemTable WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM ItemTable WHERE key = ?", [key])?;
        Ok(())
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub fn server_url(&self) -> Result<Option<String>> {
        self.get(KEY_SERVER_URL)
    }

    pub fn set_server_url(&self, url: &str) -> Result<()> {
        self.set(KEY_SERVER_URL, url.trim_end_matches('/'))
    }

    pub fn salt(&self) -> Result<Option<String>> {
        self.get(KEY_SALT)
    }

    pub fn set_salt(&self, salt_b64: &str) -> Result<()> {
        self.set(KEY_SALT, salt_b64)
    }

    /// Pending passphrase, present only between configuration save and the
    /// first successful key derivation.
    pub fn passphrase(&self) -> Result<Option<String>> {
        self.get(KEY_PASSPHRASE)
    }

    pub fn set_passphrase(&self, passphrase: &str) -> Result<()> {
        self.set(KEY_PASSPHRASE, passphrase)
    }

    pub fn remove_passphrase(&self) -> Result<()> {
        self.remove(KEY_PASSPHRASE)
    }

    pub fn key_export(&self) -> Result<Option<KeyExport>> {
        match self.get(KEY_EXPORT)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(export) => Ok(Some(export)),
                Err(e) => {
                    // A malformed export can never be restored; drop it so
                    // the caller asks for a fresh passphrase
                    log::warn!("Removing malformed key export: {}", e);
                    self.remove(KEY_EXPORT)?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub fn set_key_export(&self, export: &KeyExport) -> Result<()> {
        self.set(KEY_EXPORT, &serde_json::to_string(export)?)
    }

    pub fn remove_key_export(&self) -> Result<()> {
        self.remove(KEY_EXPORT)
    }

    /// Persistent per-device identifier, generated on first access.
    pub fn browser_id(&self) -> Result<String> {
        if let Some(id) = self.get(KEY_BROWSER_ID)? {
            return Ok(id);
        }
        let id = format!("browser_{}", uuid::Uuid::new_v4());
        self.set(KEY_BROWSER_ID, &id)?;
        log::info!("Created new browser id: {}", id);
        Ok(id)
    }

    /// Newest remote state this device has successfully merged.
    pub fn last_server_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get(KEY_LAST_SERVER_TIMESTAMP)? {
            Some(s) => Ok(DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    pub fn set_last_server_timestamp(&self, ts: DateTime<Utc>) -> Result<()> {
        self.set(KEY_LAST_SERVER_TIMESTAMP, &ts.to_rfc3339())
    }

    pub fn remove_last_server_timestamp(&self) -> Result<()> {
        self.remove(KEY_LAST_SERVER_TIMESTAMP)
    }

    /// Tab records synced down from other devices.
    pub fn remote_tabs(&self) -> Result<Vec<TabRecord>> {
        match self.get(KEY_REMOTE_TABS)? {
            Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_remote_tabs(&self, tabs: &[TabRecord]) -> Result<()> {
        self.set(KEY_REMOTE_TABS, &serde_json::to_string(tabs)?)
    }

    /// Clear all crypto state; used by the reset-and-overwrite flow.
    pub fn clear_crypto_state(&self) -> Result<()> {
        self.remove(KEY_EXPORT)?;
        self.remove(KEY_SALT)?;
        self.remove(KEY_LAST_SERVER_TIMESTAMP)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
