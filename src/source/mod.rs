// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The relational source of truth (the ERP database), read-only.

pub mod memory;
pub mod sql;

use crate::model::RawRecord;
use crate::pool::PoolError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Relational source unavailable: {0}")]
    Unavailable(String),
    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Failed to decode row: {0}")]
    Decode(String),
}

impl SourceError {
    /// Transient: the source could not be reached, as opposed to a query
    /// that reached it and failed.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Pool(_))
    }
}

#[async_trait]
pub trait RelationalConnector: Send + Sync {
    /// Cheap reachability check. Never errors; unreachable is `false`.
    async fn test_connection(&self) -> bool;

    /// Full snapshot of every record.
    async fn get_all_records(&self) -> Result<Vec<RawRecord>, SourceError>;

    async fn get_record_by_key(&self, key: &str) -> Result<Option<RawRecord>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_availability_classification() {
        assert!(SourceError::Unavailable("down".into()).is_unavailable());
        assert!(SourceError::from(PoolError::Timeout { waited: Duration::from_secs(1) }).is_unavailable());
        assert!(!SourceError::Query("syntax error".into()).is_unavailable());
        assert!(!SourceError::Decode("bad row".into()).is_unavailable());
    }
}
