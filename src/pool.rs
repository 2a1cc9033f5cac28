// src/pool.rs

//! A generic asynchronous connection pool driven by a caller-supplied
//! connection factory.
//!
//! The pool is bound to one endpoint for its whole life: on failover it is
//! drained and replaced wholesale rather than mutated in place.

use crate::connection::Connection;
use crate::errors::SentinelPoolError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Produces connections for the pool. The factory decides which endpoint to
/// dial and how to react to dial failures.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<Connection, SentinelPoolError>;
}

/// A fixed-capacity pool of idle connections.
///
/// `acquire` hands out an idle connection when one exists and otherwise asks
/// the factory for a fresh one; the pool never blocks waiting for a return.
pub struct ConnectionPool {
    size: usize,
    factory: Arc<dyn ConnectionFactory>,
    retry_delay: Duration,
    idle: Mutex<VecDeque<Connection>>,
}

impl ConnectionPool {
    pub fn new(size: usize, factory: Arc<dyn ConnectionFactory>, retry_delay: Duration) -> Self {
        Self {
            size,
            factory,
            retry_delay,
            idle: Mutex::new(VecDeque::with_capacity(size)),
        }
    }

    /// Takes an idle connection, or creates one through the factory. A
    /// factory failure is retried once after `retry_delay`.
    pub async fn acquire(&self) -> Result<Connection, SentinelPoolError> {
        if let Some(conn) = self.idle.lock().pop_front() {
            return Ok(conn);
        }
        match self.factory.create().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                warn!(
                    "Connection factory failed: {}; retrying in {:?}",
                    e, self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;
                self.factory.create().await
            }
        }
    }

    /// Returns a connection for reuse. Connections beyond the configured
    /// size are dropped.
    pub fn release(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.size {
            idle.push_back(conn);
        }
    }

    /// Discards a connection considered unusable.
    pub fn mark_bad(&self, conn: Connection) {
        drop(conn);
    }

    /// Creates connections until the pool holds its configured size. A
    /// factory failure stops the fill; connections created so far stay in
    /// the pool and the deficit is made up lazily by `acquire`.
    pub async fn fill(&self) -> Result<(), SentinelPoolError> {
        loop {
            if self.idle.lock().len() >= self.size {
                return Ok(());
            }
            let conn = self.factory.create().await?;
            self.idle.lock().push_back(conn);
        }
    }

    /// Drops every idle connection. Borrowed connections are not recalled;
    /// they fail their next operation against the stale endpoint and trigger
    /// their own recovery through the factory.
    pub fn drain(&self) {
        self.idle.lock().clear();
    }

    /// Number of idle connections currently held.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}
