// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::reconcile::reconcile;
use super::{ItemSyncResult, SyncEngine, SyncError};
use crate::model::SyncStamp;
use tracing::{debug, warn};

impl SyncEngine {
    /// Reconcile one item on demand.
    ///
    /// When the source cannot be reached the stored quantity is returned,
    /// tagged as cached, instead of an error.
    #[tracing::instrument(skip(self))]
    pub async fn check_item(&self, key: &str) -> Result<ItemSyncResult, SyncError> {
        if !self.source.test_connection().await {
            return self.cached_result(key).await;
        }

        let raw = match self.source.get_record_by_key(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(SyncError::ItemNotFound(key.to_string())),
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, "Source dropped during item check");
                return self.cached_result(key).await;
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = reconcile(self.store.as_ref(), &raw, self.qty_epsilon, SyncStamp::Checked).await?;
        debug!(?outcome, "Item checked against source");
        crate::metrics::record_item_check("source");
        Ok(ItemSyncResult::from_outcome(key, raw.quantity, outcome))
    }

    async fn cached_result(&self, key: &str) -> Result<ItemSyncResult, SyncError> {
        match self.store.find_one(key).await? {
            Some(record) => {
                debug!(quantity = record.stock_qty, "Source unavailable, serving cached quantity");
                crate::metrics::record_item_check("cached");
                Ok(ItemSyncResult::cached(key, record.stock_qty))
            }
            None => Err(SyncError::ItemNotFound(key.to_string())),
        }
    }
}
