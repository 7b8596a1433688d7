// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL connector over the blocking [`ConnectionPool`].
//!
//! Each pooled connection is an sqlx `AnyConnection` driven through a tokio
//! runtime `Handle`. Every pooled call runs on a `spawn_blocking` worker, so
//! waiting for a connection (and the pool's backoff sleeps) never stalls the
//! async executor.
//!
//! Queries must yield the columns of [`RawRecord`]:
//!
//! ```sql
//! SELECT item_code, item_name, stock_qty, category, subcategory,
//!        warehouse, uom_code, uom_name, barcode, mrp
//! FROM erp_items
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver reports some TEXT columns as BLOB and has no DECIMAL
//! mapping, so text is read as `String` with a `Vec<u8>` fallback, and
//! numbers as `f64`, then `i64`, then parsed text.

use super::{RelationalConnector, SourceError};
use crate::config::InventorySyncConfig;
use crate::model::RawRecord;
use crate::pool::{ConnectionFactory, ConnectionPool, PoolError, PoolStats};
use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Connection, Row};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Longest a reachability check may take, including waiting for a connection.
const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens `AnyConnection`s by blocking on the given runtime.
///
/// Must only be used from threads that are not runtime workers
/// (`spawn_blocking` or plain threads).
pub struct SqlConnectionFactory {
    url: String,
    runtime: Handle,
    connect_timeout: Duration,
}

impl SqlConnectionFactory {
    pub fn new(url: impl Into<String>, runtime: Handle) -> Self {
        install_drivers();
        Self {
            url: url.into(),
            runtime,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Give up on a connect attempt after `timeout`.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl ConnectionFactory for SqlConnectionFactory {
    type Connection = AnyConnection;

    fn connect(&self) -> Result<AnyConnection, PoolError> {
        let attempt = self
            .runtime
            .block_on(async { timeout(self.connect_timeout, AnyConnection::connect(&self.url)).await });
        match attempt {
            Ok(result) => result.map_err(|e| PoolError::Connect(e.to_string())),
            Err(_) => Err(PoolError::Connect(format!(
                "connect timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }

    fn is_valid(&self, conn: &mut AnyConnection) -> bool {
        matches!(
            self.runtime.block_on(async { timeout(CHECK_TIMEOUT, conn.ping()).await }),
            Ok(Ok(()))
        )
    }

    fn close(&self, conn: AnyConnection) {
        if let Err(e) = self.runtime.block_on(conn.close()) {
            debug!(error = %e, "Connection did not close cleanly");
        }
    }
}

pub struct SqlConnector {
    pool: Arc<ConnectionPool<SqlConnectionFactory>>,
    runtime: Handle,
    records_query: String,
    record_by_key_query: String,
}

impl SqlConnector {
    /// Build the pool for `config.sql_url` and warm it.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(config: &InventorySyncConfig) -> Result<Self, SourceError> {
        let url = config
            .sql_url
            .clone()
            .ok_or_else(|| SourceError::Unavailable("sql_url is not configured".into()))?;

        let runtime = Handle::current();
        let factory = SqlConnectionFactory::new(url, runtime.clone())
            .with_connect_timeout(config.pool.acquire_timeout());
        let pool_config = config.pool.clone();
        let pool = tokio::task::spawn_blocking(move || ConnectionPool::new(factory, &pool_config))
            .await
            .map_err(|e| SourceError::Query(format!("Pool warm-up task failed: {e}")))?;

        info!(active = pool.stats().active_connections, "SQL connector ready");

        Ok(Self {
            pool: Arc::new(pool),
            runtime,
            records_query: config.records_query.clone(),
            record_by_key_query: config.record_by_key_query.clone(),
        })
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close all idle connections.
    pub async fn close(&self) {
        let pool = self.pool.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pool.close_all()).await {
            warn!(error = %e, "Pool close task failed");
        }
    }

    /// Run `op` with a pooled connection on a blocking worker. `wait` bounds
    /// the checkout; `None` uses the pool's acquire timeout.
    async fn with_connection<T, Op>(&self, wait: Option<Duration>, op: Op) -> Result<T, SourceError>
    where
        T: Send + 'static,
        Op: FnOnce(&mut AnyConnection, &Handle) -> Result<T, SourceError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let runtime = self.runtime.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get(wait)?;
            op(&mut conn, &runtime)
        })
        .await
        .map_err(|e| SourceError::Query(format!("Blocking task failed: {e}")))?
    }
}

fn query_error(e: sqlx::Error) -> SourceError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            SourceError::Unavailable(e.to_string())
        }
        other => {
            crate::metrics::record_error("sql", "query", "query");
            SourceError::Query(other.to_string())
        }
    }
}

fn text(row: &AnyRow, column: &str) -> String {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .unwrap_or_default()
}

/// `Ok(None)` for NULL or a missing column, `Err` for a value that is not a number.
fn number(row: &AnyRow, column: &str) -> Result<Option<f64>, String> {
    if let Ok(value) = row.try_get::<Option<f64>, _>(column) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(column) {
        return Ok(value.map(|v| v as f64));
    }
    let raw = text(row, column);
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|e| format!("column '{column}' value '{raw}': {e}"))
}

/// Decode one row. A quantity that is not a number becomes NaN so the
/// engine rejects that item alone instead of the whole snapshot.
fn decode_row(row: &AnyRow) -> RawRecord {
    let key = text(row, "item_code");
    let quantity = match number(row, "stock_qty") {
        Ok(qty) => qty.unwrap_or(0.0),
        Err(reason) => {
            warn!(item_code = %key, %reason, "Unreadable quantity");
            f64::NAN
        }
    };
    RawRecord {
        name: text(row, "item_name"),
        quantity,
        category: text(row, "category"),
        subcategory: text(row, "subcategory"),
        warehouse: text(row, "warehouse"),
        unit_code: text(row, "uom_code"),
        unit_name: text(row, "uom_name"),
        barcode: text(row, "barcode"),
        mrp: number(row, "mrp").ok().flatten(),
        key,
    }
}

#[async_trait]
impl RelationalConnector for SqlConnector {
    async fn test_connection(&self) -> bool {
        let check = self.with_connection(Some(CHECK_TIMEOUT), |conn, runtime| {
            runtime
                .block_on(async { timeout(CHECK_TIMEOUT, conn.ping()).await })
                .map_err(|_| SourceError::Unavailable("ping timed out".into()))?
                .map_err(query_error)
        });
        match timeout(CHECK_TIMEOUT, check).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "SQL source check failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?CHECK_TIMEOUT, "SQL source check timed out");
                false
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_all_records(&self) -> Result<Vec<RawRecord>, SourceError> {
        let _timer = crate::metrics::LatencyTimer::new("sql", "get_all_records");
        let query = self.records_query.clone();
        let records = self
            .with_connection(None, move |conn, runtime| {
                let rows = runtime
                    .block_on(sqlx::query(&query).fetch_all(&mut *conn))
                    .map_err(query_error)?;
                Ok(rows.iter().map(decode_row).collect::<Vec<_>>())
            })
            .await?;
        debug!(count = records.len(), "Fetched source snapshot");
        Ok(records)
    }

    async fn get_record_by_key(&self, key: &str) -> Result<Option<RawRecord>, SourceError> {
        let _timer = crate::metrics::LatencyTimer::new("sql", "get_record_by_key");
        let query = self.record_by_key_query.clone();
        let key = key.to_string();
        self.with_connection(None, move |conn, runtime| {
            let row = runtime
                .block_on(sqlx::query(&query).bind(key).fetch_optional(&mut *conn))
                .map_err(query_error)?;
            Ok(row.as_ref().map(decode_row))
        })
        .await
    }
}
