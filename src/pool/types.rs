// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No connection available after waiting {waited:?}")]
    Timeout { waited: Duration },
    #[error("Failed to open connection: {0}")]
    Connect(String),
}

/// Point-in-time view of the pool, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub max_overflow: usize,
    /// Connections that exist right now (idle + checked out)
    pub active_connections: usize,
    /// Idle connections ready for checkout
    pub available: usize,
    pub checked_out: usize,
    /// `checked_out / (pool_size + max_overflow) * 100`
    pub utilization_percent: f64,
}

impl PoolStats {
    pub(crate) fn compute(
        pool_size: usize,
        max_overflow: usize,
        active_connections: usize,
        available: usize,
        checked_out: usize,
    ) -> Self {
        let capacity = pool_size + max_overflow;
        let utilization_percent = if capacity == 0 {
            0.0
        } else {
            checked_out as f64 / capacity as f64 * 100.0
        };
        Self {
            pool_size,
            max_overflow,
            active_connections,
            available,
            checked_out,
            utilization_percent,
        }
    }
}
