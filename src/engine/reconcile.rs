// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-item reconciliation shared by full runs and single-item checks.
//!
//! ```text
//! no document          → insert seeded from source          → Created
//! |source - stored| ≤ ε → stamp only                         → Unchanged
//! otherwise            → stock_qty, sql_server_qty, delta,
//!                        qty_changed_at, stamp, updated_at  → Updated
//! ```

use super::error::ItemError;
use super::types::ItemOutcome;
use crate::model::{AuthoritativeUpdate, InventoryRecord, RawRecord, SyncStamp};
use crate::storage::traits::{DocumentStore, StorageError};
use chrono::Utc;
use tracing::debug;

pub(crate) async fn reconcile(
    store: &dyn DocumentStore,
    raw: &RawRecord,
    epsilon: f64,
    stamp: SyncStamp,
) -> Result<ItemOutcome, ItemError> {
    let key = raw.key.as_str();
    if key.trim().is_empty() {
        return Err(ItemError::MissingKey);
    }
    if !raw.quantity.is_finite() {
        return Err(ItemError::InvalidQuantity {
            key: key.to_string(),
            value: raw.quantity,
        });
    }

    let now = Utc::now();
    let stored = match store.find_one(key).await? {
        Some(stored) => stored,
        None => match store.insert_one(&InventoryRecord::from_source(raw, now)).await {
            Ok(()) => {
                debug!(item_code = %key, quantity = raw.quantity, "Created document from source");
                return Ok(ItemOutcome::Created);
            }
            // Another writer created it first; reconcile against theirs
            Err(StorageError::AlreadyExists(_)) => store
                .find_one(key)
                .await?
                .ok_or_else(|| ItemError::Vanished(key.to_string()))?,
            Err(e) => return Err(e.into()),
        },
    };

    let previous = stored.stock_qty;
    let delta = raw.quantity - previous;

    if delta.abs() <= epsilon {
        write(store, key, AuthoritativeUpdate::touch(stamp, now)).await?;
        return Ok(ItemOutcome::Unchanged { stored: previous });
    }

    write(
        store,
        key,
        AuthoritativeUpdate::quantity_change(raw.quantity, previous, stamp, now),
    )
    .await?;
    debug!(item_code = %key, previous, current = raw.quantity, delta, "Quantity updated");
    Ok(ItemOutcome::Updated { previous, delta })
}

async fn write(store: &dyn DocumentStore, key: &str, update: AuthoritativeUpdate) -> Result<(), ItemError> {
    if store.update_fields(key, &update.into_field_map()).await? {
        Ok(())
    } else {
        Err(ItemError::Vanished(key.to_string()))
    }
}
