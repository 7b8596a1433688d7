// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine: reconciles authoritative quantities from the relational
//! source into the document store.
//!
//! # Example
//!
//! ```rust,no_run
//! use inventory_sync::{InventorySyncConfig, SyncEngine};
//! use inventory_sync::source::memory::InMemorySource;
//! use inventory_sync::storage::memory::InMemoryDocumentStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = Arc::new(SyncEngine::new(
//!     &InventorySyncConfig::default(),
//!     Arc::new(InMemorySource::new()),
//!     Arc::new(InMemoryDocumentStore::new()),
//! ));
//!
//! let run = engine.run_full_sync().await.expect("source reachable");
//! println!("{} checked, {} updated", run.items_checked, run.items_updated);
//!
//! engine.start_background();
//! // ...
//! engine.shutdown().await;
//! # }
//! ```
//!
//! # Modules
//!
//! - `types`: run/item results, stats, state
//! - `error`: [`SyncError`] and per-item [`ItemError`]
//! - `reconcile`: the per-item algorithm
//! - `run`: full sync
//! - `check`: single-item check with cached fallback
//! - `lifecycle`: background loop

mod check;
mod error;
mod lifecycle;
mod reconcile;
mod run;
mod types;

pub use error::{ItemError, SyncError};
pub use types::{EngineState, ItemOutcome, ItemSyncResult, QuantitySource, SyncRun, SyncStats};

use crate::config::InventorySyncConfig;
use crate::source::RelationalConnector;
use crate::storage::traits::DocumentStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shortest accepted loop interval.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Cumulative {
    total_syncs: u64,
    successful_syncs: u64,
    failed_syncs: u64,
    last_sync: Option<DateTime<Utc>>,
    items_synced: usize,
    qty_changes_detected: usize,
}

struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SyncEngine {
    source: Arc<dyn RelationalConnector>,
    store: Arc<dyn DocumentStore>,

    batch_size: usize,
    max_concurrent_batches: usize,
    qty_epsilon: f64,
    metadata_id: String,

    interval_ms: AtomicU64,
    enabled: AtomicBool,
    running: AtomicBool,

    state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    cumulative: RwLock<Cumulative>,
    background: Mutex<Option<BackgroundTask>>,
}

impl SyncEngine {
    pub fn new(
        config: &InventorySyncConfig,
        source: Arc<dyn RelationalConnector>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let (state, state_rx) = watch::channel(EngineState::Stopped);
        let interval = Duration::from_secs(config.sync_interval_secs).max(MIN_INTERVAL);

        Self {
            source,
            store,
            batch_size: config.batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            qty_epsilon: config.qty_epsilon,
            metadata_id: config.metadata_id.clone(),
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            enabled: AtomicBool::new(config.sync_enabled),
            running: AtomicBool::new(false),
            state,
            state_rx,
            cumulative: RwLock::new(Cumulative::default()),
            background: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    /// Takes effect from the loop's next wait.
    pub fn set_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        self.interval_ms.store(interval.as_millis() as u64, Ordering::SeqCst);
        tracing::info!(interval_secs = interval.as_secs_f64(), "Sync interval updated");
    }

    /// Re-enable syncing, restarting the background loop if it is not running.
    pub fn enable(self: &Arc<Self>) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!("Sync enabled");
        let idle = {
            let _task = self.background.lock();
            !self.is_running()
        };
        if idle {
            self.start_background();
        }
    }

    /// The loop notices on its next tick and exits.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::info!("Sync disabled");
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        let cumulative = self.cumulative.read();
        let interval = self.interval();
        let next_sync = cumulative.last_sync.and_then(|last| {
            chrono::Duration::from_std(interval)
                .ok()
                .map(|interval| last + interval)
        });

        SyncStats {
            total_syncs: cumulative.total_syncs,
            successful_syncs: cumulative.successful_syncs,
            failed_syncs: cumulative.failed_syncs,
            last_sync: cumulative.last_sync,
            items_synced: cumulative.items_synced,
            qty_changes_detected: cumulative.qty_changes_detected,
            running: self.is_running(),
            enabled: self.is_enabled(),
            interval_seconds: interval.as_secs_f64(),
            next_sync,
        }
    }

    fn record_success(&self, run: &SyncRun, finished_at: DateTime<Utc>) {
        let mut cumulative = self.cumulative.write();
        cumulative.total_syncs += 1;
        cumulative.successful_syncs += 1;
        cumulative.last_sync = Some(finished_at);
        cumulative.items_synced = run.items_checked;
        cumulative.qty_changes_detected = run.items_updated;
    }

    /// Failed runs and skipped loop ticks both count here.
    fn record_failure(&self, status: &str) {
        {
            let mut cumulative = self.cumulative.write();
            cumulative.total_syncs += 1;
            cumulative.failed_syncs += 1;
        }
        crate::metrics::record_sync_run(status);
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
        crate::metrics::set_engine_state(state == EngineState::Running);
    }
}
