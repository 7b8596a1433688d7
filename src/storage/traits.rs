// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::model::{FieldMap, InventoryRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Document already exists: {0}")]
    AlreadyExists(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Document '{id}' does not decode as an inventory record: {reason}")]
    Decode { id: String, reason: String },
}

/// Document store holding enriched inventory records, keyed by item code.
///
/// Writes are field-level: `update_fields` sets exactly the given fields
/// and leaves every other field of the document as it was.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, key: &str) -> Result<Option<InventoryRecord>, StorageError>;

    /// Merge `fields` into an existing document. Returns `false` when there
    /// is no document for `key` (nothing is created).
    async fn update_fields(&self, key: &str, fields: &FieldMap) -> Result<bool, StorageError>;

    /// Insert a new document. Fails with `AlreadyExists` if the key is taken.
    async fn insert_one(&self, record: &InventoryRecord) -> Result<(), StorageError>;

    /// Create-or-merge a metadata document: `set` fields overwrite,
    /// `inc` fields are added to (missing counts as 0).
    async fn upsert_metadata(
        &self,
        id: &str,
        set: &FieldMap,
        inc: &BTreeMap<String, i64>,
    ) -> Result<(), StorageError>;
}

/// Decode a stored JSON object into a record, tagging failures with the key.
pub fn decode_record(key: &str, doc: Value) -> Result<InventoryRecord, StorageError> {
    serde_json::from_value(doc).map_err(|e| StorageError::Decode {
        id: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_record_reports_key() {
        let err = decode_record("ITM-9", json!({"item_code": "ITM-9", "stock_qty": "lots"})).unwrap_err();
        match err {
            StorageError::Decode { id, .. } => assert_eq!(id, "ITM-9"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
