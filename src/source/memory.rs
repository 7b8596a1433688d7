// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::{RelationalConnector, SourceError};
use crate::model::RawRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-process source with an availability switch.
///
/// While unavailable, the reachability check reports `false` and every fetch fails with
/// [`SourceError::Unavailable`].
pub struct InMemorySource {
    records: DashMap<String, RawRecord>,
    available: AtomicBool,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = RawRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.upsert(record);
        }
        source
    }

    pub fn upsert(&self, record: RawRecord) {
        self.records.insert(record.key.clone(), record);
    }

    /// Change one record's quantity. Returns `false` if the key is unknown.
    pub fn set_quantity(&self, key: &str, quantity: f64) -> bool {
        match self.records.get_mut(key) {
            Some(mut record) => {
                record.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<RawRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_available(&self) -> Result<(), SourceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::Unavailable("in-memory source switched off".into()))
        }
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalConnector for InMemorySource {
    async fn test_connection(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get_all_records(&self) -> Result<Vec<RawRecord>, SourceError> {
        self.ensure_available()?;
        let mut records: Vec<RawRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn get_record_by_key(&self, key: &str) -> Result<Option<RawRecord>, SourceError> {
        self.ensure_available()?;
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_is_ordered_by_key() {
        let source = InMemorySource::with_records([
            RawRecord::new("B", 2.0),
            RawRecord::new("A", 1.0),
            RawRecord::new("C", 3.0),
        ]);

        let keys: Vec<_> = source
            .get_all_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_set_quantity() {
        let source = InMemorySource::with_records([RawRecord::new("A", 1.0)]);
        assert!(source.set_quantity("A", 7.5));
        assert!(!source.set_quantity("missing", 1.0));

        let record = source.get_record_by_key("A").await.unwrap().unwrap();
        assert_eq!(record.quantity, 7.5);
    }

    #[tokio::test]
    async fn test_unavailable_source_fails_fetches() {
        let source = InMemorySource::with_records([RawRecord::new("A", 1.0)]);
        source.set_available(false);

        assert!(!source.test_connection().await);
        assert!(source.get_all_records().await.unwrap_err().is_unavailable());
        assert!(source.get_record_by_key("A").await.unwrap_err().is_unavailable());
    }
}
