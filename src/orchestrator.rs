// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Sync orchestration
//!
//! Sequences a full sync cycle: ensure key material, fetch the remote
//! envelope, decide whether to apply it (server timestamp strictly newer
//! than the last one we merged), reconcile bookmarks, replace the cached
//! other-device tab set, then always capture and push the local state so
//! the server stays current even when nothing was pulled.
//!
//! Status transitions are published to registered observers after every
//! change; an observer-less orchestrator is fine.

use crate::browser::BrowserHost;
use crate::crypto::EnvelopeCipher;
use crate::error::{Result, SyncError};
use crate::keys::KeyManager;
use crate::models::SyncStatus;
use crate::reconcile::{ReconcileOutcome, ReconcilePolicy, TreeReconciler};
use crate::snapshot;
use crate::store::LocalStore;
use crate::transport::{self, SyncTransport};
use chrono::{DateTime, Utc};

pub type StatusObserver = Box<dyn Fn(&SyncStatus, Option<DateTime<Utc>>) + Send>;

/// What a completed cycle did.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Remote state was newer and got applied locally
    pub applied_remote: bool,
    pub reconcile: Option<ReconcileOutcome>,
    /// The local snapshot was pushed (true for every successful cycle)
    pub pushed: bool,
}

pub struct SyncOrchestrator<'a> {
    store: &'a LocalStore,
    transport: &'a dyn SyncTransport,
    host: &'a mut dyn BrowserHost,
    policy: ReconcilePolicy,
    cipher: Option<EnvelopeCipher>,
    status: SyncStatus,
    last_sync: Option<DateTime<Utc>>,
    observers: Vec<StatusObserver>,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        store: &'a LocalStore,
        transport: &'a dyn SyncTransport,
        host: &'a mut dyn BrowserHost,
    ) -> Self {
        Self {
            store,
            transport,
            host,
            policy: ReconcilePolicy::default(),
            cipher: None,
            status: SyncStatus::Idle,
            last_sync: None,
            observers: Vec::new(),
        }
    }

    pub fn set_policy(&mut self, policy: ReconcilePolicy) {
        self.policy = policy;
    }

    pub fn subscribe(&mut self, observer: StatusObserver) {
        self.observers.push(observer);
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    fn set_status(&mut self, status: SyncStatus) {
        log::debug!("Status: {}", status);
        self.status = status;
        for observer in &self.observers {
            observer(&self.status, self.last_sync);
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Run the salt bootstrap and make a usable cipher available.
    /// Sets `ConfigurationMissing` / `PassphraseNeeded` instead of failing
    /// when the problem is recoverable by user action.
    pub async fn load_configuration(&mut self) -> Result<()> {
        self.cipher = None;

        if self.store.server_url()?.is_none() {
            self.set_status(SyncStatus::ConfigurationMissing);
            return Ok(());
        }

        let key_manager = KeyManager::new(self.store, self.transport);
        match key_manager.ensure_salt().await {
            Ok(_) => {}
            Err(e) => {
                self.set_status(SyncStatus::Error(e.status_message()));
                return Err(e);
            }
        }
        match key_manager.ensure_key().await {
            Ok(cipher) => {
                self.cipher = Some(cipher);
                Ok(())
            }
            Err(SyncError::PassphraseNeeded) => {
                self.set_status(SyncStatus::PassphraseNeeded);
                Ok(())
            }
            Err(e) => {
                self.set_status(SyncStatus::Error(e.status_message()));
                Err(e)
            }
        }
    }

    // =========================================================================
    // Sync cycle
    // =========================================================================

    /// Run one sync cycle. A cycle requested while another is in flight is
    /// a logged no-op.
    pub async fn sync_cycle(&mut self, reason: &str) -> Result<SyncReport> {
        if self.status == SyncStatus::Syncing {
            log::info!("Sync already in progress, ignoring {} trigger", reason);
            return Ok(SyncReport::default());
        }
        if self.cipher.is_none() {
            let status = if self.store.server_url()?.is_none() {
                SyncStatus::ConfigurationMissing
            } else {
                SyncStatus::PassphraseNeeded
            };
            log::error!("Cannot sync: {}", status);
            self.set_status(status);
            return Ok(SyncReport::default());
        }

        log::info!("Performing sync ({})", reason);
        self.set_status(SyncStatus::Syncing);

        match self.run_cycle().await {
            Ok(report) => {
                self.last_sync = Some(Utc::now());
                self.set_status(SyncStatus::SyncSuccessful);
                Ok(report)
            }
            Err(e) => {
                log::error!("Sync failed: {}", e);
                // The last-known timestamp stays untouched so the next
                // cycle repeats the same comparison
                self.set_status(SyncStatus::Error(e.status_message()));
                Err(e)
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<SyncReport> {
        let cipher = self.cipher.clone().ok_or(SyncError::PassphraseNeeded)?;
        let mut report = SyncReport::default();

        self.host.refresh()?;

        let last_known = self.store.last_server_timestamp()?;
        log::debug!("Last known server timestamp: {:?}", last_known);

        let remote = transport::fetch_envelope(self.transport, &cipher).await?;

        let apply = match (remote.last_modified, last_known) {
            (Some(remote_ts), Some(local_ts)) => remote_ts > local_ts,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if apply {
            log::info!("Remote state is newer, applying changes");
            let outcome = TreeReconciler::with_policy(&mut *self.host, self.policy.clone())
                .apply(&remote.payload.bookmarks)?;
            log::info!(
                "Reconciled bookmarks: {} applied, {} unresolved, {} created",
                outcome.applied,
                outcome.unresolved,
                outcome.created
            );
            report.reconcile = Some(outcome);

            // Tabs are last-full-write-wins: replace the cached set
            // wholesale, but keep the existing cache when the remote list
            // is empty
            if !remote.payload.tabs.is_empty() {
                self.store.set_remote_tabs(&remote.payload.tabs)?;
            }

            if let Some(remote_ts) = remote.last_modified {
                self.store.set_last_server_timestamp(remote_ts)?;
            }
            report.applied_remote = true;
        } else {
            log::debug!("Local state is up to date, skipping apply step");
        }

        // Always push, so local-only changes reach the server even when
        // nothing was pulled
        let payload = snapshot::capture(&*self.host, self.store)?;
        let stamp = transport::push_envelope(self.transport, &cipher, payload).await?;
        // Recording our own stamp keeps the next fetch from mistaking this
        // snapshot for news and re-applying it
        if let Some(stamp) = stamp {
            self.store.set_last_server_timestamp(stamp)?;
        }
        report.pushed = true;

        Ok(report)
    }

    // =========================================================================
    // Reset and overwrite
    // =========================================================================

    /// Destroy the shared crypto state: new salt (forced onto the server),
    /// fresh key from the supplied passphrase, and a forced upload of the
    /// current local snapshot.
    pub async fn reset_and_overwrite(&mut self, passphrase: &str) -> Result<()> {
        log::warn!("Reset and overwrite: clearing local crypto state");
        self.cipher = None;
        self.store.clear_crypto_state()?;

        let key_manager = KeyManager::new(self.store, self.transport);
        let result: Result<()> = async {
            let salt = key_manager.reset_salt().await?;
            let cipher = key_manager.derive_and_store(passphrase, &salt)?;
            self.cipher = Some(cipher.clone());

            let payload = snapshot::capture(&*self.host, self.store)?;
            let stamp = transport::push_envelope(self.transport, &cipher, payload).await?;
            self.store
                .set_last_server_timestamp(stamp.unwrap_or_else(Utc::now))?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.last_sync = Some(Utc::now());
                self.set_status(SyncStatus::SyncSuccessful);
                Ok(())
            }
            Err(e) => {
                self.cipher = None;
                self.set_status(SyncStatus::Error(format!("Reset failed: {}", e)));
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserHost, CreateProperties, MemoryHost, ROOT_ID};
    use crate::models::NodeKind;
    use crate::transport::MemoryTransport;

    fn configured_store() -> LocalStore {
        let store = LocalStore::open_in_memory().unwrap();
        store.set_server_url("http://localhost:7732").unwrap();
        store.set_passphrase("shared secret").unwrap();
        store
    }

    fn add_bookmark(host: &mut MemoryHost, title: &str, url: &str) {
        host.create_bookmark(&CreateProperties {
            parent_id: ROOT_ID.to_string(),
            index: usize::MAX,
            title: title.to_string(),
            kind: NodeKind::Bookmark,
            url: Some(url.to_string()),
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_cycle_without_config_sets_status() {
        let store = LocalStore::open_in_memory().unwrap();
        let remote = MemoryTransport::new();
        let mut host = MemoryHost::new();

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        assert_eq!(*orch.status(), SyncStatus::ConfigurationMissing);

        let report = orch.sync_cycle("manual").await.unwrap();
        assert!(!report.pushed);
    }

    #[tokio::test]
    async fn test_first_sync_pushes_snapshot() {
        let store = configured_store();
        let remote = MemoryTransport::new();
        let mut host = MemoryHost::new();
        add_bookmark(&mut host, "Rust", "https://www.rust-lang.org/");

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        let report = orch.sync_cycle("manual").await.unwrap();

        assert!(report.pushed);
        assert!(!report.applied_remote); // nothing on the server yet
        assert_eq!(*orch.status(), SyncStatus::SyncSuccessful);
        assert!(remote.stored_envelope().is_some());
    }

    #[tokio::test]
    async fn test_two_devices_converge() {
        let remote = MemoryTransport::new();

        // Device A pushes its bookmark
        let store_a = configured_store();
        let mut host_a = MemoryHost::new();
        add_bookmark(&mut host_a, "Rust", "https://www.rust-lang.org/");
        let mut orch_a = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
        orch_a.load_configuration().await.unwrap();
        orch_a.sync_cycle("manual").await.unwrap();

        // Device B starts empty and pulls it
        let store_b = configured_store();
        let mut host_b = MemoryHost::new();
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();
        let report = orch_b.sync_cycle("manual").await.unwrap();

        assert!(report.applied_remote);
        let tree = host_b.bookmark_tree().unwrap();
        assert_eq!(tree.children[0].title, "Rust");
    }

    #[tokio::test]
    async fn test_own_push_is_not_reapplied_but_push_happens() {
        let remote = MemoryTransport::new();
        let store = configured_store();
        let mut host = MemoryHost::new();
        add_bookmark(&mut host, "Rust", "https://www.rust-lang.org/");

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        orch.sync_cycle("manual").await.unwrap();

        // The push recorded the server stamp, so fetching our own snapshot
        // back is not news
        let pushed_ts = remote.stored_envelope().unwrap().last_modified;
        assert_eq!(store.last_server_timestamp().unwrap(), Some(pushed_ts));

        let report = orch.sync_cycle("periodic").await.unwrap();
        assert!(!report.applied_remote);
        assert!(report.pushed);
    }

    #[tokio::test]
    async fn test_reentrancy_guard() {
        let store = configured_store();
        let remote = MemoryTransport::new();
        let mut host = MemoryHost::new();

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        // Simulate an in-flight cycle
        orch.set_status(SyncStatus::Syncing);

        let report = orch.sync_cycle("manual").await.unwrap();
        assert!(!report.pushed);
        assert_eq!(*orch.status(), SyncStatus::Syncing);
    }

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        use std::sync::{Arc, Mutex};

        let store = configured_store();
        let remote = MemoryTransport::new();
        let mut host = MemoryHost::new();

        let seen: Arc<Mutex<Vec<SyncStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.subscribe(Box::new(move |status, _| {
            sink.lock().unwrap().push(status.clone());
        }));
        orch.load_configuration().await.unwrap();
        orch.sync_cycle("manual").await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&SyncStatus::Syncing));
        assert_eq!(*seen.last().unwrap(), SyncStatus::SyncSuccessful);
    }

    #[tokio::test]
    async fn test_reset_and_overwrite_replaces_salt() {
        let remote = MemoryTransport::new();
        let store = configured_store();
        let mut host = MemoryHost::new();
        add_bookmark(&mut host, "Keep me", "https://keep.example/");

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        orch.sync_cycle("manual").await.unwrap();
        let old_salt = remote.stored_salt().unwrap();

        orch.reset_and_overwrite("new passphrase").await.unwrap();
        let new_salt = remote.stored_salt().unwrap();
        assert_ne!(old_salt, new_salt);
        assert!(remote.stored_envelope().is_some());
        assert_eq!(*orch.status(), SyncStatus::SyncSuccessful);
    }

    #[tokio::test]
    async fn test_remote_tabs_cached_wholesale() {
        let remote = MemoryTransport::new();

        // Device A with one open tab pushes
        let store_a = configured_store();
        let mut host_a = MemoryHost::new();
        host_a.open_tab("https://a.example/").unwrap();
        let mut orch_a = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
        orch_a.load_configuration().await.unwrap();
        orch_a.sync_cycle("manual").await.unwrap();

        // Device B pulls and caches A's tab as an other-device tab
        let store_b = configured_store();
        let mut host_b = MemoryHost::new();
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();
        orch_b.sync_cycle("manual").await.unwrap();

        let cached = store_b.remote_tabs().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].url, "https://a.example/");
        assert_ne!(cached[0].browser_id, store_b.browser_id().unwrap());
    }
}
