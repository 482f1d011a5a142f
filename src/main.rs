// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Marksync - main entry point

use anyhow::Result;
use clap::Parser;
use marksync::cli::{Cli, Commands, ConfigCommands, TabCommands};
use marksync::commands::{self, Environment};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let env = Environment::resolve(cli.store, cli.profile);

    match cli.command {
        // ====================================================================
        // Sync Commands
        // ====================================================================
        Commands::Sync => commands::sync_once(&env).await,
        Commands::Daemon { interval, debounce } => {
            commands::run_daemon(&env, interval, debounce).await
        }

        // ====================================================================
        // Configuration Commands
        // ====================================================================
        Commands::Config { command } => match command {
            ConfigCommands::Set {
                server_url,
                passphrase,
            } => commands::config_set(&env, &server_url, &passphrase).await,
            ConfigCommands::Show => commands::config_show(&env),
        },
        Commands::Status => commands::status(&env),
        Commands::Reset { passphrase, yes } => commands::reset(&env, &passphrase, yes).await,

        // ====================================================================
        // Tab Commands
        // ====================================================================
        Commands::Tabs { command } => match command {
            Some(TabCommands::Open { url }) => commands::tabs_open(&env, &url),
            Some(TabCommands::List) | None => commands::tabs_list(&env),
        },

        // ====================================================================
        // Server Commands
        // ====================================================================
        Commands::Serve {
            host,
            port,
            data_dir,
        } => commands::serve(host, port, data_dir).await,
    }
}
