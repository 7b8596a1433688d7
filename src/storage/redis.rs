// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis document store.
//!
//! Each inventory record is one Redis hash, one hash field per document
//! field, every value JSON-encoded:
//!
//! ```text
//! HGETALL inventory:item:ITM-001
//!   item_code      "\"ITM-001\""
//!   stock_qty      "42.0"
//!   mrp            "12.5"          <- written by editors, never by sync
//!   last_synced    "\"2026-03-01T10:00:00+00:00\""
//! ```
//!
//! Field-level merges run as a Lua script (`EXISTS` + `HSET`), so a merge
//! into a missing key creates nothing and fields outside the merge are never
//! rewritten. Records live under `{prefix}item:{key}` and metadata documents
//! under `{prefix}_meta:{id}`, so no item code can land on a metadata hash.
//! Counters are plain Redis integers (`HINCRBY`).

use super::traits::{decode_record, DocumentStore, StorageError};
use crate::metrics::LatencyTimer;
use crate::model::{FieldMap, InventoryRecord};
use crate::resilience::retry::{retry, RetryConfig};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{pipe, AsyncCommands, Client, Pipeline, Script};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

const MERGE_IF_EXISTS: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
if #ARGV > 0 then
    redis.call('HSET', KEYS[1], unpack(ARGV))
end
return 1
";

const INSERT_IF_ABSENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
";

pub struct RedisDocumentStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "inventory:" → "inventory:item:ITM-001")
    prefix: String,
    merge: Script,
    insert: Script,
}

impl RedisDocumentStore {
    /// Create a new Redis store without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new Redis store with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use inventory_sync::storage::redis::RedisDocumentStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "inventory:item:ITM-001"
    /// let store = RedisDocumentStore::with_prefix("redis://localhost", Some("inventory:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            merge: Script::new(MERGE_IF_EXISTS),
            insert: Script::new(INSERT_IF_ABSENT),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        item_key(&self.prefix, key)
    }

    #[inline]
    fn metadata_key(&self, id: &str) -> String {
        meta_key(&self.prefix, id)
    }

    /// Read a metadata document back (counters decode as JSON numbers).
    pub async fn metadata(&self, id: &str) -> Result<Option<FieldMap>, StorageError> {
        let key = self.metadata_key(id);
        let hash = self.hgetall("redis_meta_get", &key).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        decode_hash(id, hash).map(Some)
    }

    async fn hgetall(&self, operation: &str, key: &str) -> Result<HashMap<String, String>, StorageError> {
        retry(operation, &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            async move {
                let hash: HashMap<String, String> = conn.hgetall(key).await?;
                Ok(hash)
            }
        })
        .await
        .map_err(|e: redis::RedisError| backend_error("hgetall", e))
    }
}

fn item_key(prefix: &str, key: &str) -> String {
    format!("{prefix}item:{key}")
}

fn meta_key(prefix: &str, id: &str) -> String {
    format!("{prefix}_meta:{id}")
}

/// `HSET` the plain fields and `HINCRBY` the counters in one `MULTI`.
fn metadata_pipeline(key: &str, pairs: &[(String, String)], inc: &BTreeMap<String, i64>) -> Pipeline {
    let mut pipeline = pipe();
    pipeline.atomic();
    if !pairs.is_empty() {
        pipeline.hset_multiple(key, pairs).ignore();
    }
    for (field, by) in inc {
        pipeline.hincr(key, field, *by).ignore();
    }
    pipeline
}

fn backend_error(operation: &str, e: redis::RedisError) -> StorageError {
    crate::metrics::record_error("redis", operation, "backend");
    StorageError::Backend(e.to_string())
}

/// Flatten fields into `[name, json, name, json, ...]` for HSET.
fn encode_fields(fields: &FieldMap) -> Result<Vec<String>, StorageError> {
    let mut args = Vec::with_capacity(fields.len() * 2);
    for (name, value) in fields {
        let encoded = serde_json::to_string(value)
            .map_err(|e| StorageError::Backend(format!("Failed to encode field '{name}': {e}")))?;
        args.push(name.clone());
        args.push(encoded);
    }
    Ok(args)
}

fn decode_hash(id: &str, hash: HashMap<String, String>) -> Result<FieldMap, StorageError> {
    hash.into_iter()
        .map(|(name, raw)| {
            serde_json::from_str::<Value>(&raw)
                .map(|value| (name.clone(), value))
                .map_err(|e| StorageError::Decode {
                    id: id.to_string(),
                    reason: format!("field '{name}': {e}"),
                })
        })
        .collect()
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn find_one(&self, key: &str) -> Result<Option<InventoryRecord>, StorageError> {
        let _timer = LatencyTimer::new("redis", "find_one");
        let redis_key = self.prefixed_key(key);

        let hash = self.hgetall("redis_find_one", &redis_key).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        let doc = decode_hash(key, hash)?;
        decode_record(key, Value::Object(doc)).map(Some)
    }

    async fn update_fields(&self, key: &str, fields: &FieldMap) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("redis", "update_fields");
        let redis_key = self.prefixed_key(key);
        let args = encode_fields(fields)?;

        let merged: i64 = retry("redis_merge", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            let mut invocation = self.merge.key(&redis_key);
            for arg in &args {
                invocation.arg(arg);
            }
            async move { invocation.invoke_async(&mut conn).await }
        })
        .await
        .map_err(|e: redis::RedisError| backend_error("update_fields", e))?;

        Ok(merged == 1)
    }

    async fn insert_one(&self, record: &InventoryRecord) -> Result<(), StorageError> {
        let _timer = LatencyTimer::new("redis", "insert_one");
        let redis_key = self.prefixed_key(&record.item_code);
        let fields = record
            .to_fields()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let args = encode_fields(&fields)?;

        let inserted: i64 = retry("redis_insert", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            let mut invocation = self.insert.key(&redis_key);
            for arg in &args {
                invocation.arg(arg);
            }
            async move { invocation.invoke_async(&mut conn).await }
        })
        .await
        .map_err(|e: redis::RedisError| backend_error("insert_one", e))?;

        if inserted == 1 {
            Ok(())
        } else {
            Err(StorageError::AlreadyExists(record.item_code.clone()))
        }
    }

    async fn upsert_metadata(
        &self,
        id: &str,
        set: &FieldMap,
        inc: &BTreeMap<String, i64>,
    ) -> Result<(), StorageError> {
        let key = self.metadata_key(id);
        let encoded = encode_fields(set)?;
        let pairs: Vec<(String, String)> = encoded
            .chunks(2)
            .filter_map(|pair| match pair {
                [name, value] => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect();

        // Not retried: HINCRBY is not idempotent
        let _timer = LatencyTimer::new("redis", "upsert_metadata");
        let mut conn = self.connection.clone();
        let applied: Result<(), redis::RedisError> =
            metadata_pipeline(&key, &pairs, inc).query_async(&mut conn).await;
        applied.map_err(|e| backend_error("upsert_metadata", e))
    }
}
