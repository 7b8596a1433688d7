// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::source::SourceError;
use crate::storage::traits::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient; the background loop retries on its next tick.
    #[error("Relational source unavailable")]
    SourceUnavailable,
    #[error("Item not found: {0}")]
    ItemNotFound(String),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Document store error: {0}")]
    Store(#[from] StorageError),
    #[error("Item sync failed: {0}")]
    Item(#[from] ItemError),
    #[error("Sync run failed: {0}")]
    Run(String),
}

/// Failure reconciling one item. Counted by full runs, never propagated.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("Source record has an empty item code")]
    MissingKey,
    #[error("Source quantity for '{key}' is not a finite number: {value}")]
    InvalidQuantity { key: String, value: f64 },
    #[error("Document '{0}' disappeared during sync")]
    Vanished(String),
    #[error(transparent)]
    Store(#[from] StorageError),
}
