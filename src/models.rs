// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Data models for synchronized browser state
//!
//! Bookmark and tab snapshots are ephemeral: they are recomputed on every
//! sync cycle and never kept as long-lived objects. Bookmark ids are only
//! meaningful inside the profile that produced them; cross-device
//! correlation happens by attribute matching in the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Bookmark Model
// =============================================================================

/// Kind of a bookmark tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Bookmark,
    Folder,
    Separator,
}

/// A single flattened bookmark tree node.
///
/// `id` and `parent_id` are scoped to the profile that produced the
/// snapshot and must never be compared across devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkNode {
    pub id: String,
    pub parent_id: Option<String>,
    /// 0-based position among siblings
    pub index: usize,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub date_added: Option<DateTime<Utc>>,
    /// Folders only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_group_modified: Option<DateTime<Utc>>,
}

impl BookmarkNode {
    /// Root nodes carry no parent and are never created or moved.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A bookmark tree as exposed by the host, before flattening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkTreeNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub index: usize,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub date_added: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_group_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub children: Vec<BookmarkTreeNode>,
}

// =============================================================================
// Tab Model
// =============================================================================

/// A single open tab, tagged with the device that reported it.
///
/// Tab records are partitioned by `browser_id` and merged as parallel
/// per-device lists; there is no structural tab reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabRecord {
    pub id: u64,
    pub window_id: u64,
    pub index: usize,
    pub url: String,
    pub title: String,
    pub active: bool,
    pub pinned: bool,
    pub discarded: bool,
    pub browser_id: String,
    pub last_updated: DateTime<Utc>,
}

// =============================================================================
// Sync Payload and Envelope
// =============================================================================

/// The plaintext unit that is encrypted as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(default)]
    pub bookmarks: Vec<BookmarkNode>,
    #[serde(default)]
    pub tabs: Vec<TabRecord>,
}

impl SyncPayload {
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty() && self.tabs.is_empty()
    }
}

/// What actually gets encrypted: the payload plus the client-side stamp.
///
/// The client stamp is informational only; the server's stored
/// `lastModified` is the authoritative ordering value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeBody {
    pub payload: SyncPayload,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
}

/// The envelope JSON as stored by (and fetched from) the blob server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnvelope {
    /// Base64 ciphertext (12-byte nonce prepended)
    pub payload: String,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
}

/// A fetched and decrypted remote state.
#[derive(Debug, Clone)]
pub struct RemoteState {
    pub payload: SyncPayload,
    /// None when the server had no data yet (404 on fetch)
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteState {
    pub fn empty() -> Self {
        Self {
            payload: SyncPayload::default(),
            last_modified: None,
        }
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Process-lifetime sync status, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum SyncStatus {
    Idle,
    ConfigurationMissing,
    PassphraseNeeded,
    Syncing,
    SyncSuccessful,
    Error(String),
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::ConfigurationMissing => write!(f, "Configuration missing"),
            Self::PassphraseNeeded => write!(f, "Passphrase needed"),
            Self::Syncing => write!(f, "Syncing..."),
            Self::SyncSuccessful => write!(f, "Sync successful"),
            Self::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
