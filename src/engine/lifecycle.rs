// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background loop: start, stop, tick.
//!
//! ```text
//!            start_background() [enabled]
//!   Stopped ───────────────────────────────► Running
//!      ▲                                        │
//!      └──── stop_background() / disabled ──────┘
//! ```
//!
//! Stopping cancels the wait between runs. A run already in flight finishes.

use super::{BackgroundTask, EngineState, SyncEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

impl SyncEngine {
    /// Spawn the background loop. Returns `false` (and does nothing) if it
    /// is already running or syncing is disabled.
    pub fn start_background(self: &Arc<Self>) -> bool {
        if !self.is_enabled() {
            info!("Sync disabled, background loop not started");
            return false;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Background sync already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run_loop(shutdown_rx));
        let previous = self.background.lock().replace(BackgroundTask { shutdown, handle });
        if let Some(previous) = previous {
            // Loop that exited on its own (disabled); nothing left to stop
            let _ = previous.shutdown.send(true);
        }

        self.set_state(EngineState::Running);
        info!(interval_secs = self.interval().as_secs_f64(), "Background sync started");
        true
    }

    /// Cancel the scheduled wait and mark the engine stopped. Idempotent.
    pub fn stop_background(&self) {
        let task = self.background.lock().take();
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
        }
        if was_running {
            info!("Background sync stopped");
        }
        self.set_state(EngineState::Stopped);
    }

    /// Stop the loop and wait for any in-flight run to finish.
    pub async fn shutdown(&self) {
        let task = self.background.lock().take();
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                error!(error = %e, "Background sync task ended abnormally");
            }
        }
        self.set_state(EngineState::Stopped);
        info!("Sync engine shutdown complete");
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let interval = self.interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    debug!("Background loop cancelled");
                    break;
                }
            }

            let cancelled = *shutdown.borrow();
            if cancelled || !self.is_running() {
                break;
            }
            if !self.is_enabled() && self.exit_if_disabled() {
                info!("Sync disabled, background loop exiting");
                break;
            }

            self.tick().await;
        }
    }

    /// Re-checks `enabled` under the task lock, so `enable()` sees either a
    /// live loop or a stopped one.
    fn exit_if_disabled(&self) -> bool {
        let _task = self.background.lock();
        if self.is_enabled() {
            return false;
        }
        self.running.store(false, Ordering::SeqCst);
        self.set_state(EngineState::Stopped);
        true
    }

    async fn tick(&self) {
        if !self.source.test_connection().await {
            warn!("Source unreachable, skipping scheduled sync");
            self.record_failure("skipped");
            return;
        }
        if let Err(e) = self.run_full_sync().await {
            error!(error = %e, "Scheduled sync failed");
        }
    }
}
