// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection handles and the driver seam.

use super::{ConnectionPool, PoolError};
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opens, validates and closes connections for one backend.
///
/// All methods are blocking. The pool calls them from whatever thread is
/// acquiring or releasing, so async callers should go through
/// `tokio::task::spawn_blocking`.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Cheap liveness check (e.g. `SELECT 1`).
    fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// A live connection plus the metadata the pool tracks it by.
#[derive(Debug)]
pub struct PooledConnection<C> {
    id: Uuid,
    created_at: Instant,
    conn: C,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(conn: C) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            conn,
        }
    }

    /// Pool-unique identity, stable for the connection's whole life.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn into_inner(self) -> C {
        self.conn
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Checked-out connection that goes back to its pool when dropped.
pub struct PoolGuard<'a, F: ConnectionFactory> {
    pool: &'a ConnectionPool<F>,
    conn: Option<PooledConnection<F::Connection>>,
}

impl<'a, F: ConnectionFactory> PoolGuard<'a, F> {
    pub(crate) fn new(pool: &'a ConnectionPool<F>, conn: PooledConnection<F::Connection>) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    /// The pooled handle, including its id and age.
    #[must_use]
    pub fn pooled(&self) -> &PooledConnection<F::Connection> {
        // Only `Drop` takes the connection out
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pool guard used after release"),
        }
    }

    fn pooled_mut(&mut self) -> &mut PooledConnection<F::Connection> {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pool guard used after release"),
        }
    }
}

impl<F: ConnectionFactory> Deref for PoolGuard<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        self.pooled()
    }
}

impl<F: ConnectionFactory> DerefMut for PoolGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut F::Connection {
        self.pooled_mut()
    }
}

impl<F: ConnectionFactory> Drop for PoolGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
