//! Sync engine scenarios against in-memory backends.
//!
//! Failure paths use wrappers that inject errors for chosen keys or
//! operations, so every test is deterministic and needs no Docker.
//!
//! Run with: `cargo test --test sync_scenarios`

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use inventory_sync::source::memory::InMemorySource;
use inventory_sync::storage::memory::InMemoryDocumentStore;
use inventory_sync::{
    DocumentStore, FieldMap, InventoryRecord, InventorySyncConfig, QuantitySource, RawRecord,
    RelationalConnector, SourceError, StorageError, SyncEngine, SyncError,
};

// =============================================================================
// Failing wrappers
// =============================================================================

/// Document store that fails writes for selected keys, and optionally every
/// metadata upsert.
struct FailingStore {
    inner: Arc<InMemoryDocumentStore>,
    failing_keys: HashSet<String>,
    fail_metadata: bool,
    write_calls: AtomicU64,
}

impl FailingStore {
    fn new(inner: Arc<InMemoryDocumentStore>, failing_keys: &[&str]) -> Self {
        Self {
            inner,
            failing_keys: failing_keys.iter().map(|k| k.to_string()).collect(),
            fail_metadata: false,
            write_calls: AtomicU64::new(0),
        }
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_keys.contains(key) {
            Err(StorageError::Backend(format!("injected failure for {key}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn find_one(&self, key: &str) -> Result<Option<InventoryRecord>, StorageError> {
        self.inner.find_one(key).await
    }

    async fn update_fields(&self, key: &str, fields: &FieldMap) -> Result<bool, StorageError> {
        self.check(key)?;
        self.inner.update_fields(key, fields).await
    }

    async fn insert_one(&self, record: &InventoryRecord) -> Result<(), StorageError> {
        self.check(&record.item_code)?;
        self.inner.insert_one(record).await
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        set: &FieldMap,
        inc: &BTreeMap<String, i64>,
    ) -> Result<(), StorageError> {
        if self.fail_metadata {
            return Err(StorageError::Backend("metadata unavailable".into()));
        }
        self.inner.upsert_metadata(id, set, inc).await
    }
}

/// Reachable source whose snapshot query always fails.
struct BrokenSnapshotSource;

#[async_trait]
impl RelationalConnector for BrokenSnapshotSource {
    async fn test_connection(&self) -> bool {
        true
    }

    async fn get_all_records(&self) -> Result<Vec<RawRecord>, SourceError> {
        Err(SourceError::Query("relation \"erp_items\" does not exist".into()))
    }

    async fn get_record_by_key(&self, _key: &str) -> Result<Option<RawRecord>, SourceError> {
        Ok(None)
    }
}

/// Document store whose lookups are slow, recording how many overlap.
#[derive(Default)]
struct SlowStore {
    inner: InMemoryDocumentStore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl DocumentStore for SlowStore {
    async fn find_one(&self, key: &str) -> Result<Option<InventoryRecord>, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.find_one(key).await
    }

    async fn update_fields(&self, key: &str, fields: &FieldMap) -> Result<bool, StorageError> {
        self.inner.update_fields(key, fields).await
    }

    async fn insert_one(&self, record: &InventoryRecord) -> Result<(), StorageError> {
        self.inner.insert_one(record).await
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        set: &FieldMap,
        inc: &BTreeMap<String, i64>,
    ) -> Result<(), StorageError> {
        self.inner.upsert_metadata(id, set, inc).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn doc(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn small_batches() -> InventorySyncConfig {
    InventorySyncConfig {
        batch_size: 3,
        max_concurrent_batches: 2,
        ..Default::default()
    }
}

fn catalogue(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| RawRecord::new(format!("ITM-{i:03}"), i as f64).with_name(format!("Item {i}")))
        .collect()
}

fn setup(
    records: Vec<RawRecord>,
) -> (Arc<SyncEngine>, Arc<InMemorySource>, Arc<InMemoryDocumentStore>) {
    let source = Arc::new(InMemorySource::with_records(records));
    let store = Arc::new(InMemoryDocumentStore::new());
    let engine = Arc::new(SyncEngine::new(&small_batches(), source.clone(), store.clone()));
    (engine, source, store)
}

// =============================================================================
// Field preservation
// =============================================================================

#[tokio::test]
async fn quantity_change_preserves_enrichment() {
    let (engine, _source, store) = setup(vec![RawRecord::new("X1", 10.0)]);
    store.put_raw(
        "X1",
        doc(json!({
            "item_code": "X1",
            "stock_qty": 8.0,
            "sql_server_qty": 8.0,
            "mrp": 100.0,
            "serial_number": "SN-77",
            "verified": true,
            "verified_by": "auditor",
            "enrichment_history": [{"field": "mrp", "value": 100.0}],
        })),
    );

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_updated, 1);
    assert_eq!(run.items_checked, 1);

    let after = store.raw("X1").unwrap();
    assert_eq!(after["stock_qty"], json!(10.0));
    assert_eq!(after["sql_server_qty"], json!(10.0));
    assert_eq!(after["qty_change_delta"], json!(2.0));
    assert_eq!(after["mrp"], json!(100.0));
    assert_eq!(after["serial_number"], json!("SN-77"));
    assert_eq!(after["verified"], json!(true));
    assert_eq!(after["verified_by"], json!("auditor"));
    assert_eq!(after["enrichment_history"], json!([{"field": "mrp", "value": 100.0}]));
    assert!(after.contains_key("qty_changed_at"));
    assert!(after.contains_key("last_synced"));
}

#[tokio::test]
async fn unknown_fields_written_by_others_survive() {
    let (engine, _source, store) = setup(vec![RawRecord::new("X1", 3.0)]);
    store.put_raw(
        "X1",
        doc(json!({"item_code": "X1", "stock_qty": 1.0, "shelf_photo": "s3://bucket/x1.jpg"})),
    );

    engine.run_full_sync().await.unwrap();

    let after = store.raw("X1").unwrap();
    assert_eq!(after["shelf_photo"], json!("s3://bucket/x1.jpg"));
    assert_eq!(after["stock_qty"], json!(3.0));
}

#[tokio::test]
async fn unchanged_quantity_only_touches_timestamp() {
    let (engine, _source, store) = setup(vec![RawRecord::new("X1", 5.0)]);
    store.put_raw(
        "X1",
        doc(json!({"item_code": "X1", "stock_qty": 5.0004, "updated_at": "2024-01-01T00:00:00+00:00"})),
    );

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_unchanged, 1);
    assert_eq!(run.items_updated, 0);

    let after = store.raw("X1").unwrap();
    assert_eq!(after["stock_qty"], json!(5.0004), "within epsilon, stored value kept");
    assert_eq!(after["updated_at"], json!("2024-01-01T00:00:00+00:00"));
    assert!(!after.contains_key("qty_change_delta"));
    assert!(after.contains_key("last_synced"));
}

// =============================================================================
// Creation and idempotence
// =============================================================================

#[tokio::test]
async fn first_run_creates_every_document() {
    let (engine, _source, store) = setup(catalogue(10));

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_created, 10);
    assert_eq!(run.items_checked, 10);
    assert_eq!(run.errors, 0);
    assert_eq!(store.len(), 10);

    let record = store.find_one("ITM-007").await.unwrap().unwrap();
    assert_eq!(record.stock_qty, 7.0);
    assert_eq!(record.item_name, "Item 7");
    assert_eq!(record.category, "General");
    assert_eq!(record.warehouse, "Main");
    assert_eq!(record.mrp, None);
    assert_eq!(record.missing_fields, vec!["serial_number", "mrp", "hsn_code"]);
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let (engine, _source, store) = setup(catalogue(7));
    engine.run_full_sync().await.unwrap();
    let snapshot: Vec<_> = (0..7)
        .map(|i| store.raw(&format!("ITM-{i:03}")).unwrap()["stock_qty"].clone())
        .collect();

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_created, 0);
    assert_eq!(run.items_updated, 0);
    assert_eq!(run.items_unchanged, 7);
    assert_eq!(store.len(), 7);

    let again: Vec<_> = (0..7)
        .map(|i| store.raw(&format!("ITM-{i:03}")).unwrap()["stock_qty"].clone())
        .collect();
    assert_eq!(snapshot, again);
}

#[tokio::test]
async fn source_change_is_picked_up_next_run() {
    let (engine, source, store) = setup(catalogue(4));
    engine.run_full_sync().await.unwrap();

    assert!(source.set_quantity("ITM-002", 50.0));
    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_updated, 1);
    assert_eq!(run.items_unchanged, 3);

    let record = store.find_one("ITM-002").await.unwrap().unwrap();
    assert_eq!(record.stock_qty, 50.0);
    assert_eq!(record.qty_change_delta, Some(48.0));
}

// =============================================================================
// Batch concurrency
// =============================================================================

#[tokio::test]
async fn batches_run_concurrently_up_to_limit() {
    let source = Arc::new(InMemorySource::with_records(catalogue(12)));
    let store = Arc::new(SlowStore::default());
    let config = InventorySyncConfig {
        batch_size: 2,
        max_concurrent_batches: 3,
        ..Default::default()
    };
    let engine = SyncEngine::new(&config, source, store.clone());

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_created, 12);
    assert_eq!(run.errors, 0);
    // Six batches of two: three lookups overlap at most, one per running batch
    assert_eq!(store.peak.load(Ordering::SeqCst), 3);
    assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(store.inner.len(), 12);
}

// =============================================================================
// Fault isolation
// =============================================================================

#[tokio::test]
async fn one_failing_item_does_not_abort_run() {
    let source = Arc::new(InMemorySource::with_records(catalogue(9)));
    let inner = Arc::new(InMemoryDocumentStore::new());
    let store = Arc::new(FailingStore::new(inner.clone(), &["ITM-004"]));
    let engine = SyncEngine::new(&small_batches(), source, store.clone());

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.errors, 1);
    assert_eq!(run.items_created, 8);
    assert_eq!(run.items_checked, 8);
    assert!(inner.raw("ITM-004").is_none());
    assert!(inner.raw("ITM-005").is_some());
    assert_eq!(store.write_calls.load(Ordering::SeqCst), 9);

    let stats = engine.stats();
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.items_synced, 8);
}

#[tokio::test]
async fn empty_key_and_bad_quantity_count_as_errors() {
    let mut records = catalogue(3);
    records.push(RawRecord::new("", 4.0));
    records.push(RawRecord::new("ITM-NAN", f64::NAN));
    let (engine, _source, store) = setup(records);

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.errors, 2);
    assert_eq!(run.items_created, 3);
    assert!(store.raw("ITM-NAN").is_none());
    assert!(store.raw("").is_none());
}

#[tokio::test]
async fn metadata_failure_is_not_fatal() {
    let source = Arc::new(InMemorySource::with_records(catalogue(2)));
    let inner = Arc::new(InMemoryDocumentStore::new());
    let mut failing = FailingStore::new(inner.clone(), &[]);
    failing.fail_metadata = true;
    let engine = SyncEngine::new(&small_batches(), source, Arc::new(failing));

    let run = engine.run_full_sync().await.unwrap();
    assert_eq!(run.items_created, 2);
    assert!(inner.metadata("sql_qty_sync").is_none());
    assert_eq!(engine.stats().successful_syncs, 1);
}

// =============================================================================
// Run-level failures
// =============================================================================

#[tokio::test]
async fn unreachable_source_fails_run() {
    let (engine, source, store) = setup(catalogue(3));
    source.set_available(false);

    let err = engine.run_full_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable));
    assert!(store.is_empty());

    let stats = engine.stats();
    assert_eq!(stats.total_syncs, 1);
    assert_eq!(stats.failed_syncs, 1);
    assert_eq!(stats.last_sync, None);
}

#[tokio::test]
async fn snapshot_failure_fails_run() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let engine = SyncEngine::new(&small_batches(), Arc::new(BrokenSnapshotSource), store.clone());

    let err = engine.sync_now().await.unwrap_err();
    match err {
        SyncError::Run(message) => assert!(message.contains("erp_items")),
        other => panic!("expected run failure, got {other}"),
    }
    assert_eq!(engine.stats().failed_syncs, 1);
    assert!(store.metadata("sql_qty_sync").is_none());
}

// =============================================================================
// Metadata and stats
// =============================================================================

#[tokio::test]
async fn metadata_document_tracks_runs() {
    let (engine, _source, store) = setup(catalogue(5));

    engine.run_full_sync().await.unwrap();
    engine.run_full_sync().await.unwrap();

    let meta = store.metadata("sql_qty_sync").unwrap();
    assert_eq!(meta["total_syncs"], json!(2));
    assert!(meta["last_sync"].is_string());
    assert!(meta["updated_at"].is_string());
    assert_eq!(meta["stats"]["items_checked"], json!(5));
    assert_eq!(meta["stats"]["items_unchanged"], json!(5));
}

#[tokio::test]
async fn stats_follow_successful_runs() {
    let (engine, source, _store) = setup(catalogue(4));
    engine.run_full_sync().await.unwrap();
    source.set_quantity("ITM-001", 11.0);
    source.set_quantity("ITM-003", 33.0);
    engine.run_full_sync().await.unwrap();

    let stats = engine.stats();
    assert_eq!(stats.total_syncs, 2);
    assert_eq!(stats.successful_syncs, 2);
    assert_eq!(stats.failed_syncs, 0);
    assert_eq!(stats.items_synced, 4);
    assert_eq!(stats.qty_changes_detected, 2);

    let last = stats.last_sync.unwrap();
    let next = stats.next_sync.unwrap();
    assert_eq!((next - last).num_seconds(), 900);
}

// =============================================================================
// Single-item check
// =============================================================================

#[tokio::test]
async fn check_item_updates_from_source() {
    let (engine, _source, store) = setup(vec![RawRecord::new("X1", 10.0)]);
    store.put_raw("X1", doc(json!({"item_code": "X1", "stock_qty": 8.0, "mrp": 100.0})));

    let result = engine.check_item("X1").await.unwrap();
    assert!(result.updated);
    assert_eq!(result.quantity, 10.0);
    assert_eq!(result.previous_quantity, Some(8.0));
    assert_eq!(result.delta, Some(2.0));
    assert_eq!(result.source, QuantitySource::Source);

    let after = store.raw("X1").unwrap();
    assert_eq!(after["mrp"], json!(100.0));
    assert!(after.contains_key("last_checked"));
    assert!(!after.contains_key("last_synced"));
}

#[tokio::test]
async fn check_item_falls_back_to_cache() {
    let (engine, source, store) = setup(vec![RawRecord::new("X1", 10.0)]);
    store.put_raw("X1", doc(json!({"item_code": "X1", "stock_qty": 8.0})));
    source.set_available(false);

    let result = engine.check_item("X1").await.unwrap();
    assert_eq!(result.quantity, 8.0);
    assert!(!result.updated);
    assert_eq!(result.source, QuantitySource::Cached);
    assert_eq!(result.message, "Source unavailable, using cached data");

    assert_eq!(store.raw("X1").unwrap()["stock_qty"], json!(8.0));
}

#[tokio::test]
async fn check_item_without_source_or_cache_is_not_found() {
    let (engine, source, _store) = setup(vec![RawRecord::new("X1", 10.0)]);
    source.set_available(false);

    let err = engine.check_item("X1").await.unwrap_err();
    assert!(matches!(err, SyncError::ItemNotFound(key) if key == "X1"));
}

#[tokio::test]
async fn check_item_unknown_to_source_is_not_found() {
    let (engine, _source, store) = setup(catalogue(1));

    let err = engine.check_item("NOPE").await.unwrap_err();
    assert!(matches!(err, SyncError::ItemNotFound(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn check_item_creates_missing_document() {
    let (engine, _source, store) = setup(vec![RawRecord::new("X1", 4.0)]);

    let result = engine.check_item("X1").await.unwrap();
    assert!(result.created);
    assert_eq!(result.quantity, 4.0);
    assert_eq!(store.find_one("X1").await.unwrap().unwrap().stock_qty, 4.0);
}
