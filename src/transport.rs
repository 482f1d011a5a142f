// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Sync transport: talks to the blob server
//!
//! The transport seam is a trait so the orchestrator and key manager can be
//! exercised against an in-memory remote. `HttpTransport` is the production
//! implementation over reqwest.

use crate::crypto::EnvelopeCipher;
use crate::error::{Result, SyncError};
use crate::models::{EnvelopeBody, RemoteState, StoredEnvelope, SyncPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Result of a non-forcing salt upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltUpload {
    /// Server accepted the value (created or forced overwrite)
    Accepted,
    /// Server already holds a salt (409); refetch and adopt it
    AlreadyExists,
}

/// Wire operations against the blob server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// GET /sync/salt; absence (404) is a valid state, not an error.
    async fn fetch_salt(&self) -> Result<Option<String>>;
    /// POST /sync/salt, optionally forcing an overwrite.
    async fn upload_salt(&self, salt_b64: &str, force: bool) -> Result<SaltUpload>;
    /// GET /sync/data; absence (404) is a valid empty state.
    async fn fetch_data(&self) -> Result<Option<StoredEnvelope>>;
    /// POST /sync/data with the ciphertext payload. Returns the
    /// server-assigned `lastModified` when the server reports it.
    async fn push_data(&self, ciphertext: &str) -> Result<Option<DateTime<Utc>>>;
}

// =============================================================================
// Envelope layer
// =============================================================================

/// Fetch and decrypt the remote envelope. A missing remote blob yields an
/// empty payload with no timestamp. Decryption failure is fatal for the
/// cycle.
pub async fn fetch_envelope(
    transport: &dyn SyncTransport,
    cipher: &EnvelopeCipher,
) -> Result<RemoteState> {
    let stored = match transport.fetch_data().await? {
        Some(stored) => stored,
        None => {
            log::info!("No data on server yet, assuming initial sync");
            return Ok(RemoteState::empty());
        }
    };

    let body = cipher.decrypt_body(&stored.payload)?;
    // Only the server-assigned timestamp is authoritative for ordering
    Ok(RemoteState {
        payload: body.payload,
        last_modified: Some(stored.last_modified),
    })
}

/// Encrypt and push the full local snapshot. The client stamp inside the
/// envelope is informational; the server assigns its own `lastModified`
/// and the returned value is that stamp, when reported. Callers record it
/// so a later fetch of their own snapshot is not mistaken for news.
pub async fn push_envelope(
    transport: &dyn SyncTransport,
    cipher: &EnvelopeCipher,
    payload: SyncPayload,
) -> Result<Option<DateTime<Utc>>> {
    let body = EnvelopeBody {
        payload,
        last_modified: Utc::now(),
    };
    let ciphertext = cipher.encrypt_body(&body)?;
    transport.push_data(&ciphertext).await
}

// =============================================================================
// HTTP implementation
// =============================================================================

#[derive(Debug, Deserialize)]
struct SaltResponse {
    salt: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(rename = "lastModified")]
    last_modified: Option<DateTime<Utc>>,
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(format!("marksync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_salt(&self) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url("/sync/salt"))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            404 => Ok(None),
            s if response.status().is_success() => {
                let body: SaltResponse = response
                    .json()
                    .await
                    .map_err(|e| SyncError::Transport(format!("Invalid salt response: {}", e)))?;
                log::debug!("Fetched salt from server (status {})", s);
                Ok(Some(body.salt))
            }
            s => Err(SyncError::Transport(format!(
                "Server error fetching salt: {}",
                s
            ))),
        }
    }

    async fn upload_salt(&self, salt_b64: &str, force: bool) -> Result<SaltUpload> {
        let mut url = self.url("/sync/salt");
        if force {
            url.push_str("?force=true");
        }
        let response = self
            .client
            .post(url)
            .json(&json!({ "salt": salt_b64 }))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            409 if !force => Ok(SaltUpload::AlreadyExists),
            _ if response.status().is_success() => Ok(SaltUpload::Accepted),
            s => Err(SyncError::Transport(format!(
                "Server error uploading salt: {}",
                s
            ))),
        }
    }

    async fn fetch_data(&self) -> Result<Option<StoredEnvelope>> {
        let response = self
            .client
            .get(self.url("/sync/data"))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            404 => Ok(None),
            _ if response.status().is_success() => {
                let stored: StoredEnvelope = response
                    .json()
                    .await
                    .map_err(|e| SyncError::Transport(format!("Invalid envelope: {}", e)))?;
                Ok(Some(stored))
            }
            s => Err(SyncError::Transport(format!(
                "Server error fetching data: {}",
                s
            ))),
        }
    }

    async fn push_data(&self, ciphertext: &str) -> Result<Option<DateTime<Utc>>> {
        let response = self
            .client
            .post(self.url("/sync/data"))
            .json(&json!({ "payload": ciphertext }))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "Server error pushing data: {}",
                response.status().as_u16()
            )));
        }
        // Older server builds omit the stamp; that only costs one redundant
        // re-apply on the next cycle
        let stamp = response
            .json::<PushResponse>()
            .await
            .ok()
            .and_then(|r| r.last_modified);
        log::debug!("Pushed encrypted snapshot to server (stamp {:?})", stamp);
        Ok(stamp)
    }
}

// =============================================================================
// In-memory implementation (tests and simulations)
// =============================================================================

#[derive(Debug, Default)]
struct MemoryRemoteState {
    salt: Option<String>,
    data: Option<StoredEnvelope>,
    pushes: usize,
}

/// In-memory remote. Clone handles share the same underlying store, so
/// multiple "clients" can race against one server.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryRemoteState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_salt(&self) -> Option<String> {
        self.state.lock().unwrap().salt.clone()
    }

    pub fn stored_envelope(&self) -> Option<StoredEnvelope> {
        self.state.lock().unwrap().data.clone()
    }

    /// How many snapshots have been pushed, across all clone handles.
    pub fn push_count(&self) -> usize {
        self.state.lock().unwrap().pushes
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn fetch_salt(&self) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().salt.clone())
    }

    async fn upload_salt(&self, salt_b64: &str, force: bool) -> Result<SaltUpload> {
        let mut state = self.state.lock().unwrap();
        if state.salt.is_some() && !force {
            return Ok(SaltUpload::AlreadyExists);
        }
        state.salt = Some(salt_b64.to_string());
        Ok(SaltUpload::Accepted)
    }

    async fn fetch_data(&self) -> Result<Option<StoredEnvelope>> {
        Ok(self.state.lock().unwrap().data.clone())
    }

    async fn push_data(&self, ciphertext: &str) -> Result<Option<DateTime<Utc>>> {
        let mut state = self.state.lock().unwrap();
        let stamp = Utc::now();
        state.data = Some(StoredEnvelope {
            payload: ciphertext.to_string(),
            last_modified: stamp,
        });
        state.pushes += 1;
        Ok(Some(stamp))
    }
}

// =============================================================================
// Tests
// =============================================================================
