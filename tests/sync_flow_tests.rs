//! End-to-end sync flow tests
//!
//! This test file covers:
//! - First contact between two fresh devices
//! - Edit propagation through the reconciler
//! - Tab visibility across devices
//! - Wrong-passphrase and reset lockout behavior
//! - File-backed profile hosts
//! - The full stack over HTTP against the real blob server

use marksync::browser::{BrowserHost, CreateProperties, MemoryHost, ProfileHost, ROOT_ID};
use marksync::models::{NodeKind, SyncStatus};
use marksync::orchestrator::SyncOrchestrator;
use marksync::reconcile::ReconcilePolicy;
use marksync::snapshot::flatten_tree;
use marksync::store::LocalStore;
use marksync::transport::MemoryTransport;
use marksync::SyncError;

// ============================================================================
// Test Helpers
// ============================================================================

fn configured_store(passphrase: &str) -> LocalStore {
    let store = LocalStore::open_in_memory().unwrap();
    store.set_server_url("http://localhost:7732").unwrap();
    store.set_passphrase(passphrase).unwrap();
    store
}

fn add_bookmark(host: &mut dyn BrowserHost, parent: &str, title: &str, url: &str) -> String {
    host.create_bookmark(&CreateProperties {
        parent_id: parent.to_string(),
        index: usize::MAX,
        title: title.to_string(),
        kind: NodeKind::Bookmark,
        url: Some(url.to_string()),
    })
    .unwrap()
    .id
}

fn add_folder(host: &mut dyn BrowserHost, parent: &str, title: &str) -> String {
    host.create_bookmark(&CreateProperties {
        parent_id: parent.to_string(),
        index: usize::MAX,
        title: title.to_string(),
        kind: NodeKind::Folder,
        url: None,
    })
    .unwrap()
    .id
}

/// Titles of all non-root nodes, in tree pre-order.
fn titles(host: &dyn BrowserHost) -> Vec<String> {
    flatten_tree(&host.bookmark_tree().unwrap())
        .into_iter()
        .filter(|n| !n.is_root())
        .map(|n| n.title)
        .collect()
}

// ============================================================================
// First Contact
// ============================================================================

mod first_contact_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_fresh_devices_converge() {
        let remote = MemoryTransport::new();

        let store_a = configured_store("shared");
        let mut host_a = MemoryHost::new();
        let reading = add_folder(&mut host_a, ROOT_ID, "Reading");
        add_bookmark(&mut host_a, &reading, "Rust Book", "https://doc.rust-lang.org/book/");
        add_bookmark(&mut host_a, ROOT_ID, "News", "https://news.example/");

        let mut orch_a = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
        orch_a.load_configuration().await.unwrap();
        orch_a.sync_cycle("manual").await.unwrap();

        let store_b = configured_store("shared");
        let mut host_b = MemoryHost::new();
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();
        let report = orch_b.sync_cycle("manual").await.unwrap();

        assert!(report.applied_remote);
        assert_eq!(titles(&host_a), titles(&host_b));
        // Both landed on the same salt
        assert_eq!(store_a.salt().unwrap(), store_b.salt().unwrap());
    }

    #[tokio::test]
    async fn test_syncing_twice_is_idempotent() {
        let remote = MemoryTransport::new();
        let store = configured_store("shared");
        let mut host = MemoryHost::new();
        add_bookmark(&mut host, ROOT_ID, "Only", "https://only.example/");

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        orch.sync_cycle("manual").await.unwrap();
        let count_after_first = host.node_count();

        // Pull our own push back: reconcile matches everything, creates
        // nothing
        store.remove_last_server_timestamp().unwrap();
        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();
        let report = orch.sync_cycle("manual").await.unwrap();

        assert!(report.applied_remote);
        let outcome = report.reconcile.unwrap();
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.unresolved, 0);
        assert_eq!(host.node_count(), count_after_first);
    }
}

// ============================================================================
// Edit Propagation
// ============================================================================

mod edit_propagation_tests {
    use super::*;

    /// Shared setup: A creates the bookmark, B pulls it, and A absorbs B's
    /// echo before renaming. Without that absorb step A's rename cycle
    /// would fetch the echo, fail the title match against the renamed
    /// node, and resurrect the old copy on A itself (the push path records
    /// the server stamp, so the absorb cycle ends with A fully current).
    async fn setup_and_rename(
        remote: &MemoryTransport,
        store_a: &LocalStore,
        host_a: &mut MemoryHost,
        store_b: &LocalStore,
        host_b: &mut MemoryHost,
    ) {
        let id = add_bookmark(host_a, ROOT_ID, "Old title", "https://page.example/");
        {
            let mut orch_a = SyncOrchestrator::new(store_a, remote, host_a);
            orch_a.load_configuration().await.unwrap();
            orch_a.sync_cycle("manual").await.unwrap();
        }

        {
            let mut orch_b = SyncOrchestrator::new(store_b, remote, host_b);
            orch_b.load_configuration().await.unwrap();
            orch_b.sync_cycle("manual").await.unwrap();
        }

        // A absorbs B's echo; everything attribute-matches, nothing changes
        {
            let mut orch_a = SyncOrchestrator::new(store_a, remote, host_a);
            orch_a.load_configuration().await.unwrap();
            let report = orch_a.sync_cycle("manual").await.unwrap();
            let outcome = report.reconcile.unwrap();
            assert_eq!(outcome.created, 0);
        }

        // A renames and pushes; its own previous push is not news, so no
        // stale copy reappears locally
        host_a.update_bookmark(&id, Some("New title"), None).unwrap();
        {
            let mut orch_a = SyncOrchestrator::new(store_a, remote, host_a);
            orch_a.load_configuration().await.unwrap();
            let report = orch_a.sync_cycle("manual").await.unwrap();
            assert!(!report.applied_remote);
        }
        assert_eq!(titles(host_a), vec!["New title".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_propagates_with_deletions_enabled() {
        let remote = MemoryTransport::new();
        let store_a = configured_store("shared");
        let mut host_a = MemoryHost::new();
        let store_b = configured_store("shared");
        let mut host_b = MemoryHost::new();
        setup_and_rename(&remote, &store_a, &mut host_a, &store_b, &mut host_b).await;

        // B pulls with deletions enabled so the stale copy goes away
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.set_policy(ReconcilePolicy {
            allow_deletions: true,
            ..ReconcilePolicy::default()
        });
        orch_b.load_configuration().await.unwrap();
        orch_b.sync_cycle("manual").await.unwrap();

        assert_eq!(titles(&host_b), vec!["New title".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_copy_survives_with_deletions_disabled() {
        let remote = MemoryTransport::new();
        let store_a = configured_store("shared");
        let mut host_a = MemoryHost::new();
        let store_b = configured_store("shared");
        let mut host_b = MemoryHost::new();
        setup_and_rename(&remote, &store_a, &mut host_a, &store_b, &mut host_b).await;

        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();
        let report = orch_b.sync_cycle("manual").await.unwrap();

        let outcome = report.reconcile.unwrap();
        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.planned_deletions.len(), 1);
        let mut got = titles(&host_b);
        got.sort();
        assert_eq!(got, vec!["New title".to_string(), "Old title".to_string()]);
    }
}

// ============================================================================
// Tabs
// ============================================================================

mod tab_tests {
    use super::*;

    #[tokio::test]
    async fn test_tabs_travel_between_three_devices() {
        let remote = MemoryTransport::new();

        let store_a = configured_store("shared");
        let mut host_a = MemoryHost::new();
        host_a.open_tab("https://a.example/article").unwrap();
        {
            let mut orch = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        // B pulls A's tab and pushes it onward together with its own
        let store_b = configured_store("shared");
        let mut host_b = MemoryHost::new();
        host_b.open_tab("https://b.example/docs").unwrap();
        {
            let mut orch = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        // C sees both, neither under its own browser id
        let store_c = configured_store("shared");
        let mut host_c = MemoryHost::new();
        {
            let mut orch = SyncOrchestrator::new(&store_c, &remote, &mut host_c);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        let cached = store_c.remote_tabs().unwrap();
        let mut urls: Vec<&str> = cached.iter().map(|t| t.url.as_str()).collect();
        urls.sort();
        assert_eq!(urls, vec!["https://a.example/article", "https://b.example/docs"]);
        let own = store_c.browser_id().unwrap();
        assert!(cached.iter().all(|t| t.browser_id != own));
    }
}

// ============================================================================
// Key Mismatch and Reset
// ============================================================================

mod lockout_tests {
    use super::*;

    #[tokio::test]
    async fn test_wrong_passphrase_fails_to_decrypt() {
        let remote = MemoryTransport::new();

        let store_a = configured_store("right horse battery");
        let mut host_a = MemoryHost::new();
        add_bookmark(&mut host_a, ROOT_ID, "Secret", "https://secret.example/");
        {
            let mut orch = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        let store_b = configured_store("wrong guess");
        let mut host_b = MemoryHost::new();
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();

        let err = orch_b.sync_cycle("manual").await.unwrap_err();
        assert!(matches!(err, SyncError::Decryption));
        assert!(matches!(orch_b.status(), SyncStatus::Error(_)));
        // Nothing leaked into the local tree
        assert!(titles(&host_b).is_empty());
    }

    #[tokio::test]
    async fn test_reset_locks_out_devices_with_old_key() {
        let remote = MemoryTransport::new();

        let store_a = configured_store("original");
        let mut host_a = MemoryHost::new();
        add_bookmark(&mut host_a, ROOT_ID, "Shared", "https://shared.example/");
        {
            let mut orch = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        let store_b = configured_store("original");
        let mut host_b = MemoryHost::new();
        {
            let mut orch = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        // A resets with a new passphrase
        {
            let mut orch = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
            orch.load_configuration().await.unwrap();
            orch.reset_and_overwrite("rotated").await.unwrap();
        }

        // B still holds the old key export and can no longer read the blob
        store_b.remove_last_server_timestamp().unwrap();
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();
        let err = orch_b.sync_cycle("manual").await.unwrap_err();
        assert!(matches!(err, SyncError::Decryption));

        // Reconfiguring with the new passphrase brings B back
        store_b.clear_crypto_state().unwrap();
        store_b.set_passphrase("rotated").unwrap();
        let mut orch_b = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
        orch_b.load_configuration().await.unwrap();
        orch_b.sync_cycle("manual").await.unwrap();
        assert!(titles(&host_b).contains(&"Shared".to_string()));
    }
}

// ============================================================================
// File-backed Profiles
// ============================================================================

mod profile_host_tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_two_profile_dirs_converge_on_disk() {
        let remote = MemoryTransport::new();
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();

        let store_a = configured_store("shared");
        let mut host_a = ProfileHost::open(dir_a.path()).unwrap();
        add_bookmark(&mut host_a, ROOT_ID, "Persisted", "https://disk.example/");
        {
            let mut orch = SyncOrchestrator::new(&store_a, &remote, &mut host_a);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        let store_b = configured_store("shared");
        let mut host_b = ProfileHost::open(dir_b.path()).unwrap();
        {
            let mut orch = SyncOrchestrator::new(&store_b, &remote, &mut host_b);
            orch.load_configuration().await.unwrap();
            orch.sync_cycle("manual").await.unwrap();
        }

        // The pulled bookmark is on disk in B's profile
        let raw = std::fs::read_to_string(dir_b.path().join("bookmarks.json")).unwrap();
        assert!(raw.contains("Persisted"));
        assert!(raw.contains("https://disk.example/"));

        // Reopening B's profile sees the same tree
        let reopened = ProfileHost::open(dir_b.path()).unwrap();
        assert!(titles(&reopened).contains(&"Persisted".to_string()));
    }
}

// ============================================================================
// Full Stack over HTTP
// ============================================================================

mod http_stack_tests {
    use super::*;
    use actix_web::{web, App, HttpServer};
    use marksync::server::{configure_routes, BlobState};
    use marksync::transport::HttpTransport;
    use tempfile::TempDir;

    /// First contact through the real server: salt bootstrap over the wire,
    /// envelope push and pull, server-stamped ordering.
    #[actix_web::test]
    async fn test_first_contact_through_blob_server() {
        let data_dir = TempDir::new().unwrap();
        let state = web::Data::new(BlobState::load(data_dir.path().to_path_buf()).unwrap());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(configure_routes)
        })
        .listen(listener)
        .unwrap()
        .workers(1)
        .run();
        let server_handle = server.handle();
        actix_web::rt::spawn(server);

        let base_url = format!("http://127.0.0.1:{}", port);
        let transport = HttpTransport::new(&base_url).unwrap();

        let store_a = configured_store("over the wire");
        let mut host_a = MemoryHost::new();
        add_bookmark(&mut host_a, ROOT_ID, "Wire", "https://wire.example/");
        {
            let mut orch = SyncOrchestrator::new(&store_a, &transport, &mut host_a);
            orch.load_configuration().await.unwrap();
            let report = orch.sync_cycle("manual").await.unwrap();
            assert!(report.pushed);
        }

        let store_b = configured_store("over the wire");
        let mut host_b = MemoryHost::new();
        {
            let mut orch = SyncOrchestrator::new(&store_b, &transport, &mut host_b);
            orch.load_configuration().await.unwrap();
            let report = orch.sync_cycle("manual").await.unwrap();
            assert!(report.applied_remote);
        }

        assert_eq!(titles(&host_a), titles(&host_b));
        assert_eq!(store_a.salt().unwrap(), store_b.salt().unwrap());
        // B recorded the server-stamped timestamp
        assert!(store_b.last_server_timestamp().unwrap().is_some());

        server_handle.stop(false).await;
    }
}
