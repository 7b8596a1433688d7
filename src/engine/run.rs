// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full sync: snapshot the source, reconcile every record in batches.

use super::reconcile::reconcile;
use super::types::BatchTally;
use super::{SyncEngine, SyncError, SyncRun};
use crate::model::{FieldMap, RawRecord, SyncStamp};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

impl SyncEngine {
    /// Reconcile the whole source snapshot into the document store.
    ///
    /// Item failures are counted in [`SyncRun::errors`] and never abort the
    /// run. The run itself fails only when the source is unreachable or the
    /// snapshot cannot be read.
    #[tracing::instrument(skip(self), fields(run_id))]
    pub async fn run_full_sync(&self) -> Result<SyncRun, SyncError> {
        let mut run = SyncRun::start();
        tracing::Span::current().record("run_id", tracing::field::display(run.run_id));
        let started = Instant::now();
        info!("Starting full sync");

        // ========== PHASE 1: Check source ==========
        if !self.source.test_connection().await {
            warn!("Source unreachable, full sync not attempted");
            self.record_failure("failure");
            return Err(SyncError::SourceUnavailable);
        }

        // ========== PHASE 2: Snapshot ==========
        let records = match self.source.get_all_records().await {
            Ok(records) => records,
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, "Source dropped before snapshot completed");
                self.record_failure("failure");
                return Err(SyncError::SourceUnavailable);
            }
            Err(e) => {
                error!(error = %e, "Failed to read source snapshot");
                crate::metrics::record_error("sql", "get_all_records", "query");
                self.record_failure("failure");
                return Err(SyncError::Run(format!("Bulk fetch failed: {e}")));
            }
        };

        // ========== PHASE 3: Reconcile in batches ==========
        let semaphore = Semaphore::new(self.max_concurrent_batches);
        let batches = records
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, batch)| {
                let semaphore = &semaphore;
                async move {
                    match semaphore.acquire().await {
                        Ok(_permit) => self.process_batch(index, batch).await,
                        Err(e) => {
                            error!(batch = index, error = %e, "Batch could not be scheduled");
                            BatchTally::failed(batch.len())
                        }
                    }
                }
            });
        for tally in join_all(batches).await {
            run.absorb(tally);
        }
        run.finish(started.elapsed());

        // ========== PHASE 4: Record ==========
        let finished_at = Utc::now();
        self.record_success(&run, finished_at);
        crate::metrics::record_sync_run("success");
        crate::metrics::record_sync_duration(started.elapsed());
        crate::metrics::record_items("created", run.items_created);
        crate::metrics::record_items("updated", run.items_updated);
        crate::metrics::record_items("unchanged", run.items_unchanged);
        crate::metrics::record_items("error", run.errors);

        self.write_run_metadata(&run, finished_at).await;

        info!(
            items_checked = run.items_checked,
            items_updated = run.items_updated,
            items_created = run.items_created,
            errors = run.errors,
            duration_seconds = run.duration_seconds,
            "Full sync completed"
        );
        Ok(run)
    }

    /// Manual trigger; same as [`SyncEngine::run_full_sync`].
    pub async fn sync_now(&self) -> Result<SyncRun, SyncError> {
        self.run_full_sync().await
    }

    /// Items within a batch run one after another, each isolated.
    async fn process_batch(&self, index: usize, batch: &[RawRecord]) -> BatchTally {
        let mut tally = BatchTally::default();
        for raw in batch {
            match reconcile(self.store.as_ref(), raw, self.qty_epsilon, SyncStamp::Synced).await {
                Ok(outcome) => tally.record(&outcome),
                Err(e) => {
                    warn!(batch = index, item_code = %raw.key, error = %e, "Item sync failed");
                    tally.errors += 1;
                }
            }
        }
        debug!(batch = index, size = batch.len(), ?tally, "Batch reconciled");
        tally
    }

    /// Upsert the run summary into the store's metadata. Logged, never fatal.
    async fn write_run_metadata(&self, run: &SyncRun, finished_at: DateTime<Utc>) {
        let summary = match serde_json::to_value(run) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Failed to encode run summary");
                return;
            }
        };

        let mut set = FieldMap::new();
        set.insert("last_sync".into(), Value::String(finished_at.to_rfc3339()));
        set.insert("stats".into(), summary);
        set.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
        let inc = BTreeMap::from([("total_syncs".to_string(), 1)]);

        if let Err(e) = self.store.upsert_metadata(&self.metadata_id, &set, &inc).await {
            warn!(metadata_id = %self.metadata_id, error = %e, "Failed to record sync metadata");
            crate::metrics::record_error("store", "upsert_metadata", "backend");
        }
    }
}
