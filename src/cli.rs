// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! CLI argument definitions using clap derive macros

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Marksync - encrypted bookmark and tab sync across browser profiles
#[derive(Parser)]
#[command(name = "marksync")]
#[command(version)]
#[command(about = "Encrypted bookmark and tab synchronization", long_about = None)]
pub struct Cli {
    /// Path to the local state database (defaults to the platform data dir)
    #[arg(long, global = true, env = "MARKSYNC_STORE")]
    pub store: Option<PathBuf>,

    /// Browser profile directory holding bookmarks.json and tabs.json
    #[arg(long, global = true, env = "MARKSYNC_PROFILE")]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    // ============================================================================
    // Sync Commands
    // ============================================================================
    /// Run a single sync cycle and exit
    Sync,

    /// Run continuously: periodic sync plus debounced change-triggered sync
    Daemon {
        /// Seconds between periodic syncs
        #[arg(long, default_value_t = 900)]
        interval: u64,

        /// Quiet window in seconds before a local change triggers a sync
        #[arg(long, default_value_t = 5)]
        debounce: u64,
    },

    // ============================================================================
    // Configuration Commands
    // ============================================================================
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show sync status and stored state
    Status,

    /// Generate a fresh salt, re-derive the key, and overwrite the server
    /// state with this profile's data
    Reset {
        /// Passphrase to derive the new key from
        #[arg(long)]
        passphrase: String,

        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    // ============================================================================
    // Tab Commands
    // ============================================================================
    /// Inspect and open tabs synced from other devices
    Tabs {
        #[command(subcommand)]
        command: Option<TabCommands>,
    },

    // ============================================================================
    // Server Commands
    // ============================================================================
    /// Run the self-hosted blob server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, default_value_t = 7732)]
        port: u16,

        /// Directory for the persisted salt and data blobs
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Store the server URL and passphrase, then run an initial sync
    Set {
        /// Blob server base URL, e.g. http://localhost:7732
        #[arg(long)]
        server_url: String,

        /// Passphrase shared by all devices (erased once the key is derived)
        #[arg(long)]
        passphrase: String,
    },
    /// Print the stored configuration
    Show,
}

#[derive(Subcommand)]
pub enum TabCommands {
    /// List tabs reported by other devices
    List,
    /// Open a synced tab in the local profile by URL
    Open {
        /// URL of the remote tab to open locally
        url: String,
    },
}
