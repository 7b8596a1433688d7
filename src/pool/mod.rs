// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded, thread-safe pool of blocking relational connections.
//!
//! # Lifecycle
//!
//! ```text
//!   new() ──► pool_size connections created eagerly ──► idle queue
//!
//!   acquire(deadline)
//!     ├─ idle available ──► too old? ──► discard + create fresh
//!     │                     invalid? ──► discard + create fresh
//!     │                     else     ──► checked out
//!     ├─ active < capacity ──► reserve slot ──► create (overflow)
//!     └─ exhausted ──► sleep 50ms, 100ms, ... 500ms ──► retry until deadline
//!
//!   release(conn)
//!     ├─ not checked out ──► warn, counters untouched
//!     ├─ invalid         ──► discard
//!     └─ valid           ──► idle queue (discard if full)
//! ```
//!
//! A connection is either idle or checked out, never both. `active` counts
//! connections that exist; `pending` counts slots reserved by creators that
//! have not finished connecting. `active + pending` never exceeds
//! `pool_size + max_overflow`.

mod connection;
mod idle;
mod types;

pub use connection::{ConnectionFactory, PoolGuard, PooledConnection};
pub use types::{PoolError, PoolStats};

use crate::config::PoolConfig;
use crate::resilience::retry::RetryConfig;
use idle::IdleQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct Tracking {
    active: usize,
    pending: usize,
    checked_out: HashMap<Uuid, Instant>,
}

pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    pool_size: usize,
    max_overflow: usize,
    acquire_timeout: Duration,
    recycle: Option<Duration>,
    idle: IdleQueue<PooledConnection<F::Connection>>,
    tracking: Mutex<Tracking>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Build the pool and warm it with `pool_size` connections.
    ///
    /// Warm-up stops at the first connect failure; the pool then starts
    /// smaller and grows on demand up to capacity.
    pub fn new(factory: F, config: &PoolConfig) -> Self {
        let capacity = config.capacity();
        let pool = Self {
            factory,
            pool_size: config.pool_size,
            max_overflow: config.max_overflow,
            acquire_timeout: config.acquire_timeout(),
            recycle: config.recycle(),
            idle: IdleQueue::new(capacity),
            tracking: Mutex::new(Tracking::default()),
        };

        for created in 0..config.pool_size {
            match pool.factory.connect() {
                Ok(conn) => {
                    pool.tracking.lock().active += 1;
                    if let Err(conn) = pool.idle.try_push(PooledConnection::new(conn)) {
                        pool.discard(conn, "idle queue full");
                    }
                    crate::metrics::record_pool_connection("created");
                }
                Err(e) => {
                    warn!(created, wanted = config.pool_size, error = %e, "Pool warm-up stopped early");
                    break;
                }
            }
        }

        let stats = pool.stats();
        info!(
            pool_size = stats.pool_size,
            max_overflow = stats.max_overflow,
            active = stats.active_connections,
            "Connection pool initialized"
        );
        pool.publish();
        pool
    }

    /// Check out a connection, waiting until `deadline` if the pool is exhausted.
    pub fn acquire(&self, deadline: Instant) -> Result<PooledConnection<F::Connection>, PoolError> {
        let started = Instant::now();
        let mut backoff = RetryConfig::pool_acquire().backoff();

        loop {
            if let Some(conn) = self.idle.try_pop() {
                let conn = self.refresh(conn)?;
                crate::metrics::record_pool_wait(started.elapsed());
                return Ok(self.check_out(conn));
            }

            if self.reserve_slot() {
                let conn = self.create_reserved()?;
                debug!(connection_id = %conn.id(), "Opened overflow connection");
                crate::metrics::record_pool_wait(started.elapsed());
                return Ok(self.check_out(conn));
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now.duration_since(started);
                warn!(?waited, "Connection pool exhausted, acquire timed out");
                crate::metrics::record_pool_timeout();
                return Err(PoolError::Timeout { waited });
            }
            std::thread::sleep(backoff.next_delay().min(deadline - now));
        }
    }

    /// Scoped checkout. `None` waits for the configured acquire timeout.
    pub fn get(&self, timeout: Option<Duration>) -> Result<PoolGuard<'_, F>, PoolError> {
        let deadline = Instant::now() + timeout.unwrap_or(self.acquire_timeout);
        let conn = self.acquire(deadline)?;
        Ok(PoolGuard::new(self, conn))
    }

    /// Return a checked-out connection. Unknown connections are closed
    /// without touching the pool's counters.
    pub fn release(&self, mut conn: PooledConnection<F::Connection>) {
        let tracked = self.tracking.lock().checked_out.remove(&conn.id()).is_some();
        if !tracked {
            warn!(connection_id = %conn.id(), "Released connection is not checked out from this pool");
            self.factory.close(conn.into_inner());
            return;
        }

        if self.factory.is_valid(&mut conn) {
            if let Err(conn) = self.idle.try_push(conn) {
                self.discard(conn, "idle queue full");
            }
        } else {
            self.discard(conn, "invalid on release");
        }
        self.publish();
    }

    pub fn validate(&self, conn: &mut PooledConnection<F::Connection>) -> bool {
        self.factory.is_valid(conn)
    }

    /// Close every idle connection and forget all tracking.
    ///
    /// Connections still checked out are left with their holders; releasing
    /// one afterwards is a logged no-op that closes it.
    pub fn close_all(&self) {
        let drained = {
            let mut tracking = self.tracking.lock();
            tracking.active = 0;
            tracking.checked_out.clear();
            self.idle.drain()
        };

        let closed = drained.len();
        for conn in drained {
            self.factory.close(conn.into_inner());
        }
        info!(closed, "Connection pool closed");
        self.publish();
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (active, checked_out) = {
            let tracking = self.tracking.lock();
            (tracking.active, tracking.checked_out.len())
        };
        PoolStats::compute(
            self.pool_size,
            self.max_overflow,
            active,
            self.idle.len(),
            checked_out,
        )
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool_size + self.max_overflow
    }

    // ========== internals ==========

    /// Recycle or validate a connection just popped from the idle queue.
    fn refresh(
        &self,
        mut conn: PooledConnection<F::Connection>,
    ) -> Result<PooledConnection<F::Connection>, PoolError> {
        if let Some(max_age) = self.recycle {
            if conn.age() > max_age {
                debug!(connection_id = %conn.id(), age = ?conn.age(), "Recycling aged connection");
                self.replace(conn, "recycled");
                return self.create_reserved();
            }
        }

        if self.factory.is_valid(&mut conn) {
            return Ok(conn);
        }

        warn!(connection_id = %conn.id(), "Idle connection failed validation, replacing");
        self.replace(conn, "discarded");
        self.create_reserved()
    }

    fn reserve_slot(&self) -> bool {
        let mut tracking = self.tracking.lock();
        if tracking.active + tracking.pending < self.capacity() {
            tracking.pending += 1;
            true
        } else {
            false
        }
    }

    /// Connect into a slot previously reserved in `pending`.
    fn create_reserved(&self) -> Result<PooledConnection<F::Connection>, PoolError> {
        let result = self.factory.connect();

        let mut tracking = self.tracking.lock();
        tracking.pending = tracking.pending.saturating_sub(1);
        match result {
            Ok(conn) => {
                tracking.active += 1;
                drop(tracking);
                crate::metrics::record_pool_connection("created");
                Ok(PooledConnection::new(conn))
            }
            Err(e) => {
                drop(tracking);
                crate::metrics::record_error("sql", "connect", "connect");
                Err(e)
            }
        }
    }

    /// Close `conn` and turn its active slot into a pending reservation,
    /// so a replacement can be created without racing other creators.
    fn replace(&self, conn: PooledConnection<F::Connection>, event: &str) {
        {
            let mut tracking = self.tracking.lock();
            tracking.active = tracking.active.saturating_sub(1);
            tracking.pending += 1;
        }
        self.factory.close(conn.into_inner());
        crate::metrics::record_pool_connection(event);
    }

    fn discard(&self, conn: PooledConnection<F::Connection>, reason: &str) {
        {
            let mut tracking = self.tracking.lock();
            tracking.active = tracking.active.saturating_sub(1);
        }
        debug!(connection_id = %conn.id(), reason, "Discarding connection");
        self.factory.close(conn.into_inner());
        crate::metrics::record_pool_connection("discarded");
    }

    fn check_out(&self, conn: PooledConnection<F::Connection>) -> PooledConnection<F::Connection> {
        self.tracking.lock().checked_out.insert(conn.id(), Instant::now());
        self.publish();
        conn
    }

    fn publish(&self) {
        let stats = self.stats();
        crate::metrics::set_pool_connections(
            stats.active_connections,
            stats.available,
            stats.checked_out,
        );
    }
}
