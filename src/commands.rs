// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Command implementations

use crate::browser::{BrowserHost, ProfileHost};
use crate::error::SyncError;
use crate::models::SyncStatus;
use crate::orchestrator::SyncOrchestrator;
use crate::scheduler;
use crate::server::{run_server, ServerConfig};
use crate::store::{default_store_path, LocalStore};
use crate::transport::HttpTransport;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Paths resolved from CLI flags, env, or platform defaults.
pub struct Environment {
    pub store_path: PathBuf,
    pub profile_dir: PathBuf,
}

impl Environment {
    pub fn resolve(store: Option<PathBuf>, profile: Option<PathBuf>) -> Self {
        let store_path = store.unwrap_or_else(default_store_path);
        let profile_dir = profile.unwrap_or_else(|| {
            store_path
                .parent()
                .map(|p| p.join("profile"))
                .unwrap_or_else(|| PathBuf::from("profile"))
        });
        Self {
            store_path,
            profile_dir,
        }
    }

    fn open(&self) -> Result<(LocalStore, ProfileHost)> {
        let store = LocalStore::open(&self.store_path)
            .with_context(|| format!("Failed to open store at {}", self.store_path.display()))?;
        let host = ProfileHost::open(&self.profile_dir).with_context(|| {
            format!("Failed to open profile at {}", self.profile_dir.display())
        })?;
        Ok((store, host))
    }

    fn transport(&self, store: &LocalStore) -> Result<HttpTransport> {
        let url = store.server_url()?.ok_or_else(|| {
            SyncError::Configuration(
                "No server URL configured. Run `marksync config set` first".to_string(),
            )
        })?;
        Ok(HttpTransport::new(&url)?)
    }
}

// =============================================================================
// Sync Commands
// =============================================================================

pub async fn sync_once(env: &Environment) -> Result<()> {
    let (store, mut host) = env.open()?;
    let transport = env.transport(&store)?;

    let mut orchestrator = SyncOrchestrator::new(&store, &transport, &mut host);
    orchestrator.load_configuration().await?;
    match orchestrator.status() {
        SyncStatus::ConfigurationMissing => {
            return Err(SyncError::Configuration(
                "No server URL configured. Run `marksync config set` first".to_string(),
            )
            .into())
        }
        SyncStatus::PassphraseNeeded => {
            bail!("No key material. Run `marksync config set` to provide a passphrase")
        }
        _ => {}
    }

    let report = orchestrator.sync_cycle("manual").await?;
    if let Some(outcome) = &report.reconcile {
        println!(
            "{} Applied remote changes: {} created, {} updated, {} moved, {} unresolved",
            "[OK]".green(),
            outcome.created,
            outcome.updated,
            outcome.moved,
            outcome.unresolved
        );
        if !outcome.planned_deletions.is_empty() && outcome.deleted == 0 {
            println!(
                "{} {} local item(s) are absent from the server (deletion disabled)",
                "[!]".yellow(),
                outcome.planned_deletions.len()
            );
        }
    } else {
        println!("{} Local state already up to date", "[OK]".green());
    }
    println!("{} Pushed local snapshot", "[OK]".green());
    Ok(())
}

pub async fn run_daemon(env: &Environment, interval_secs: u64, debounce_secs: u64) -> Result<()> {
    let (store, mut host) = env.open()?;
    let transport = env.transport(&store)?;

    let mut orchestrator = SyncOrchestrator::new(&store, &transport, &mut host);
    orchestrator.subscribe(Box::new(|status, _| {
        log::info!("Status changed: {}", status);
    }));
    orchestrator.load_configuration().await?;

    let (handle, triggers) = scheduler::channel();

    // Profile file watcher: mtime polling, coarse on purpose since the
    // scheduler debounces anyway
    tokio::spawn(watch_profile(env.profile_dir.clone(), handle.clone()));

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_handle.shutdown();
        }
    });

    println!(
        "{} Daemon running (every {}s, {}s debounce). Press Ctrl+C to stop.",
        "[*]".blue().bold(),
        interval_secs,
        debounce_secs
    );
    scheduler::run(
        &mut orchestrator,
        triggers,
        Duration::from_secs(interval_secs),
        Duration::from_secs(debounce_secs),
    )
    .await;
    Ok(())
}

async fn watch_profile(dir: PathBuf, handle: scheduler::SchedulerHandle) {
    let mut last_seen = profile_mtime(&dir);
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        ticker.tick().await;
        let current = profile_mtime(&dir);
        if current != last_seen {
            last_seen = current;
            handle.notify_change();
        }
    }
}

fn profile_mtime(dir: &Path) -> Option<SystemTime> {
    ["bookmarks.json", "tabs.json"]
        .iter()
        .filter_map(|name| std::fs::metadata(dir.join(name)).ok())
        .filter_map(|meta| meta.modified().ok())
        .max()
}

// =============================================================================
// Configuration Commands
// =============================================================================

pub async fn config_set(env: &Environment, server_url: &str, passphrase: &str) -> Result<()> {
    let (store, mut host) = env.open()?;
    store.set_server_url(server_url)?;
    store.set_passphrase(passphrase)?;
    println!("{} Configuration saved", "[OK]".green());

    // Derive the key (erasing the raw passphrase) and run the first cycle
    let transport = env.transport(&store)?;
    let mut orchestrator = SyncOrchestrator::new(&store, &transport, &mut host);
    orchestrator.load_configuration().await?;
    orchestrator.sync_cycle("configuration saved").await?;
    println!("{} Initial sync complete", "[OK]".green());
    Ok(())
}

pub fn config_show(env: &Environment) -> Result<()> {
    let (store, _) = env.open()?;

    println!("{} Configuration", "[*]".blue().bold());
    println!("   Store:      {}", env.store_path.display());
    println!("   Profile:    {}", env.profile_dir.display());
    println!(
        "   Server URL: {}",
        store.server_url()?.unwrap_or_else(|| "(not set)".into())
    );
    println!("   Browser ID: {}", store.browser_id()?);
    println!(
        "   Key:        {}",
        if store.key_export()?.is_some() {
            "derived".green()
        } else if store.passphrase()?.is_some() {
            "passphrase pending derivation".yellow()
        } else {
            "(not set)".red()
        }
    );
    Ok(())
}

pub fn status(env: &Environment) -> Result<()> {
    let (store, _) = env.open()?;

    println!("{} Sync status", "[*]".blue().bold());
    let configured = store.server_url()?.is_some();
    let keyed = store.key_export()?.is_some() || store.passphrase()?.is_some();
    let state = if !configured {
        "configuration missing".red()
    } else if !keyed {
        "passphrase needed".yellow()
    } else {
        "ready".green()
    };
    println!("   State:              {}", state);
    println!(
        "   Salt:               {}",
        if store.salt()?.is_some() {
            "present"
        } else {
            "absent"
        }
    );
    println!(
        "   Last server write:  {}",
        store
            .last_server_timestamp()?
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "(never synced)".into())
    );
    println!(
        "   Cached remote tabs: {}",
        store.remote_tabs()?.len()
    );
    Ok(())
}

pub async fn reset(env: &Environment, passphrase: &str, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "Reset replaces the server salt and data for ALL devices. \
             Re-run with --yes to confirm"
        );
    }
    let (store, mut host) = env.open()?;
    let transport = env.transport(&store)?;

    let mut orchestrator = SyncOrchestrator::new(&store, &transport, &mut host);
    orchestrator.reset_and_overwrite(passphrase).await?;
    println!(
        "{} Server state replaced. Other devices must reconfigure with the new passphrase",
        "[OK]".green()
    );
    Ok(())
}

// =============================================================================
// Tab Commands
// =============================================================================

pub fn tabs_list(env: &Environment) -> Result<()> {
    let (store, _) = env.open()?;
    let tabs = store.remote_tabs()?;

    if tabs.is_empty() {
        println!("No tabs from other devices. Run `marksync sync` first.");
        return Ok(());
    }
    println!("{} Tabs on other devices:", "[*]".blue().bold());
    for tab in &tabs {
        println!(
            "   {} {}\n      {}",
            tab.browser_id.dimmed(),
            tab.title.bold(),
            tab.url
        );
    }
    Ok(())
}

pub fn tabs_open(env: &Environment, url: &str) -> Result<()> {
    let (store, mut host) = env.open()?;
    let known = store.remote_tabs()?.iter().any(|t| t.url == url);
    if !known {
        println!("{} URL not in the synced tab list, opening anyway", "[!]".yellow());
    }
    host.open_tab(url)?;
    println!("{} Opened {}", "[OK]".green(), url);
    Ok(())
}

// =============================================================================
// Server Commands
// =============================================================================

pub async fn serve(host: String, port: u16, data_dir: Option<PathBuf>) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("marksync")
            .join("server")
    });
    run_server(ServerConfig {
        host,
        port,
        data_dir,
    })
    .await?;
    Ok(())
}
