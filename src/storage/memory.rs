// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::traits::{decode_record, DocumentStore, StorageError};
use crate::model::{FieldMap, InventoryRecord};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;

/// Document store over `DashMap`, holding raw JSON objects so that fields
/// written by other parties survive exactly as written.
pub struct InMemoryDocumentStore {
    docs: DashMap<String, FieldMap>,
    metadata: DashMap<String, FieldMap>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            metadata: DashMap::new(),
        }
    }

    /// The stored document as-is
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<FieldMap> {
        self.docs.get(key).map(|r| r.value().clone())
    }

    /// Store a document as-is, bypassing record validation
    pub fn put_raw(&self, key: impl Into<String>, doc: FieldMap) {
        self.docs.insert(key.into(), doc);
    }

    #[must_use]
    pub fn metadata(&self, id: &str) -> Option<FieldMap> {
        self.metadata.get(id).map(|r| r.value().clone())
    }

    /// Get current document count
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Clear all documents and metadata
    pub fn clear(&self) {
        self.docs.clear();
        self.metadata.clear();
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(&self, key: &str) -> Result<Option<InventoryRecord>, StorageError> {
        let doc = match self.docs.get(key) {
            Some(r) => r.value().clone(),
            None => return Ok(None),
        };
        decode_record(key, Value::Object(doc)).map(Some)
    }

    async fn update_fields(&self, key: &str, fields: &FieldMap) -> Result<bool, StorageError> {
        match self.docs.get_mut(key) {
            Some(mut doc) => {
                for (name, value) in fields {
                    doc.insert(name.clone(), value.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_one(&self, record: &InventoryRecord) -> Result<(), StorageError> {
        let doc = record
            .to_fields()
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match self.docs.entry(record.item_code.clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(record.item_code.clone())),
            Entry::Vacant(slot) => {
                slot.insert(doc);
                Ok(())
            }
        }
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        set: &FieldMap,
        inc: &BTreeMap<String, i64>,
    ) -> Result<(), StorageError> {
        let mut doc = self.metadata.entry(id.to_string()).or_default();
        for (name, value) in set {
            doc.insert(name.clone(), value.clone());
        }
        for (name, by) in inc {
            let current = doc.get(name).and_then(Value::as_i64).unwrap_or(0);
            doc.insert(name.clone(), Value::from(current + by));
        }
        Ok(())
    }
}
