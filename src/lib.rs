// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Marksync - encrypted bookmark and tab synchronization
//!
//! Multiple browser profiles converge on a shared bookmark tree and see
//! each other's open tabs through a dumb self-hosted blob server. The
//! server stores a single AES-256-GCM envelope and the PBKDF2 salt; it
//! never sees plaintext or the passphrase.
//!
//! The main pieces:
//!
//! - [`crypto`] - salt generation, PBKDF2 key derivation, envelope cipher
//! - [`keys`] - salt bootstrap protocol and key lifecycle
//! - [`transport`] - blob server client (HTTP and in-memory)
//! - [`browser`] - host seam: bookmark tree and tab access
//! - [`snapshot`] - flattening local state into a sync payload
//! - [`reconcile`] - multi-pass bookmark tree reconciliation
//! - [`orchestrator`] - the sync cycle and its status machine
//! - [`scheduler`] - periodic and debounced cycle triggering
//! - [`server`] - the self-hostable blob server

pub mod browser;
pub mod cli;
pub mod commands;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
pub mod scheduler;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod transport;

pub use error::{Result, SyncError};
pub use models::{SyncPayload, SyncStatus};
