// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Background loop state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// No background loop
    Stopped,
    /// Background loop scheduled
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Result of one full sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Items reconciled without error (created + updated + unchanged)
    pub items_checked: usize,
    pub items_updated: usize,
    pub items_created: usize,
    pub items_unchanged: usize,
    pub errors: usize,
    pub duration_seconds: f64,
}

impl SyncRun {
    pub(crate) fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            items_checked: 0,
            items_updated: 0,
            items_created: 0,
            items_unchanged: 0,
            errors: 0,
            duration_seconds: 0.0,
        }
    }

    pub(crate) fn absorb(&mut self, tally: BatchTally) {
        self.items_created += tally.created;
        self.items_updated += tally.updated;
        self.items_unchanged += tally.unchanged;
        self.errors += tally.errors;
        self.items_checked = self.items_created + self.items_updated + self.items_unchanged;
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.duration_seconds = elapsed.as_secs_f64();
    }
}

/// Per-batch counters, summed into the [`SyncRun`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BatchTally {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
}

impl BatchTally {
    /// Every item of the batch counted as an error.
    pub fn failed(items: usize) -> Self {
        Self {
            errors: items,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Created => self.created += 1,
            ItemOutcome::Updated { .. } => self.updated += 1,
            ItemOutcome::Unchanged { .. } => self.unchanged += 1,
        }
    }
}

/// What reconciliation did to one document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemOutcome {
    Created,
    Updated { previous: f64, delta: f64 },
    Unchanged { stored: f64 },
}

/// Where a reported quantity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantitySource {
    /// Read from the relational source just now
    Source,
    /// Source unreachable; last value held by the document store
    Cached,
}

/// Result of a single-item check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSyncResult {
    pub item_code: String,
    pub quantity: f64,
    pub previous_quantity: Option<f64>,
    pub delta: Option<f64>,
    pub updated: bool,
    pub created: bool,
    pub source: QuantitySource,
    pub message: String,
}

impl ItemSyncResult {
    pub(crate) fn from_outcome(item_code: &str, quantity: f64, outcome: ItemOutcome) -> Self {
        let (previous_quantity, delta, updated, created, message) = match outcome {
            ItemOutcome::Created => (None, None, false, true, "Item created from source"),
            ItemOutcome::Updated { previous, delta } => {
                (Some(previous), Some(delta), true, false, "Quantity updated from source")
            }
            ItemOutcome::Unchanged { stored } => (Some(stored), Some(0.0), false, false, "Quantity unchanged"),
        };
        Self {
            item_code: item_code.to_string(),
            quantity,
            previous_quantity,
            delta,
            updated,
            created,
            source: QuantitySource::Source,
            message: message.to_string(),
        }
    }

    pub(crate) fn cached(item_code: &str, quantity: f64) -> Self {
        Self {
            item_code: item_code.to_string(),
            quantity,
            previous_quantity: None,
            delta: None,
            updated: false,
            created: false,
            source: QuantitySource::Cached,
            message: "Source unavailable, using cached data".to_string(),
        }
    }
}

/// Cumulative engine statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    /// Successful runs plus failed and skipped attempts
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub last_sync: Option<DateTime<Utc>>,
    /// Items checked by the last successful run
    pub items_synced: usize,
    /// Quantity updates in the last successful run
    pub qty_changes_detected: usize,
    pub running: bool,
    pub enabled: bool,
    pub interval_seconds: f64,
    /// `last_sync + interval`; `None` until the first successful run
    pub next_sync: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_sums_tallies() {
        let mut run = SyncRun::start();
        run.absorb(BatchTally { created: 1, updated: 2, unchanged: 3, errors: 1 });
        run.absorb(BatchTally::failed(4));

        assert_eq!(run.items_checked, 6);
        assert_eq!(run.items_updated, 2);
        assert_eq!(run.errors, 5);
    }

    #[test]
    fn test_item_result_from_outcome() {
        let result = ItemSyncResult::from_outcome("X1", 10.0, ItemOutcome::Updated { previous: 8.0, delta: 2.0 });
        assert!(result.updated);
        assert_eq!(result.previous_quantity, Some(8.0));
        assert_eq!(result.delta, Some(2.0));
        assert_eq!(result.source, QuantitySource::Source);
    }

    #[test]
    fn test_quantity_source_serializes_lowercase() {
        let json = serde_json::to_value(ItemSyncResult::cached("X1", 8.0)).unwrap();
        assert_eq!(json["source"], "cached");
        assert_eq!(json["updated"], false);
    }
}
