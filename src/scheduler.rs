// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Sync scheduling
//!
//! Drives the orchestrator for the daemon: a periodic tick plus a
//! trailing-edge debounce for local-change notifications, so a burst of
//! edits collapses into a single cycle once the burst goes quiet.

use crate::orchestrator::SyncOrchestrator;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Run a cycle immediately
    Manual,
    /// A local edit happened; run once the debounce window closes
    LocalChange,
    Shutdown,
}

/// Cloneable sender half handed out to whatever produces triggers.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SyncTrigger>,
}

impl SchedulerHandle {
    pub fn notify_change(&self) {
        let _ = self.tx.send(SyncTrigger::LocalChange);
    }

    pub fn request_sync(&self) {
        let _ = self.tx.send(SyncTrigger::Manual);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SyncTrigger::Shutdown);
    }
}

pub fn channel() -> (SchedulerHandle, mpsc::UnboundedReceiver<SyncTrigger>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SchedulerHandle { tx }, rx)
}

/// Run the scheduling loop until shutdown is requested or every handle is
/// dropped. Cycle failures are logged and the loop keeps going; the next
/// tick retries.
pub async fn run(
    orchestrator: &mut SyncOrchestrator<'_>,
    mut triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    period: Duration,
    debounce: Duration,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately and doubles as the startup sync
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(orchestrator, "periodic").await;
            }
            trigger = triggers.recv() => match trigger {
                Some(SyncTrigger::Manual) => {
                    deadline = None;
                    run_cycle(orchestrator, "manual").await;
                }
                Some(SyncTrigger::LocalChange) => {
                    // Trailing edge: every new change pushes the deadline out
                    deadline = Some(Instant::now() + debounce);
                }
                Some(SyncTrigger::Shutdown) | None => {
                    log::info!("Scheduler shutting down");
                    break;
                }
            },
            _ = async { time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                deadline = None;
                run_cycle(orchestrator, "local change").await;
            }
        }
    }
}

async fn run_cycle(orchestrator: &mut SyncOrchestrator<'_>, reason: &str) {
    if let Err(e) = orchestrator.sync_cycle(reason).await {
        log::error!("Scheduled sync failed: {}", e);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MemoryHost;
    use crate::store::LocalStore;
    use crate::transport::MemoryTransport;

    fn configured_store() -> LocalStore {
        let store = LocalStore::open_in_memory().unwrap();
        store.set_server_url("http://localhost:7732").unwrap();
        store.set_passphrase("shared secret").unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_collapses_into_one_push() {
        let store = configured_store();
        let remote = MemoryTransport::new();
        let mut host = MemoryHost::new();

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();

        let (handle, rx) = channel();
        // Long period so only the debounce (and the immediate startup tick)
        // can fire
        let loop_fut = run(&mut orch, rx, Duration::from_secs(3600), DEFAULT_DEBOUNCE);
        tokio::pin!(loop_fut);

        // Let the startup tick complete
        tokio::select! {
            _ = &mut loop_fut => panic!("loop ended early"),
            _ = time::sleep(Duration::from_millis(10)) => {}
        }
        let pushes_after_startup = remote.push_count();

        for _ in 0..5 {
            handle.notify_change();
            tokio::select! {
                _ = &mut loop_fut => panic!("loop ended early"),
                _ = time::sleep(Duration::from_secs(1)) => {}
            }
        }
        // Five changes one second apart, five-second window: one cycle
        // after the last change goes quiet
        tokio::select! {
            _ = &mut loop_fut => panic!("loop ended early"),
            _ = time::sleep(Duration::from_secs(10)) => {}
        }
        assert_eq!(remote.push_count(), pushes_after_startup + 1);

        handle.shutdown();
        loop_fut.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_cancels_pending_debounce() {
        let store = configured_store();
        let remote = MemoryTransport::new();
        let mut host = MemoryHost::new();

        let mut orch = SyncOrchestrator::new(&store, &remote, &mut host);
        orch.load_configuration().await.unwrap();

        let (handle, rx) = channel();
        let loop_fut = run(&mut orch, rx, Duration::from_secs(3600), DEFAULT_DEBOUNCE);
        tokio::pin!(loop_fut);

        tokio::select! {
            _ = &mut loop_fut => panic!("loop ended early"),
            _ = time::sleep(Duration::from_millis(10)) => {}
        }
        let pushes_after_startup = remote.push_count();

        handle.notify_change();
        handle.request_sync();
        tokio::select! {
            _ = &mut loop_fut => panic!("loop ended early"),
            _ = time::sleep(Duration::from_secs(30)) => {}
        }
        // The manual run happened and the debounce deadline was dropped
        assert_eq!(remote.push_count(), pushes_after_startup + 1);

        handle.shutdown();
        loop_fut.await;
    }
}
