// src/client.rs

//! The client facade: bootstrap, the master resolution loop, the pool
//! lifecycle, and the pooled command surface.

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::errors::SentinelPoolError;
use crate::monitor::{self, AvailabilityFlag};
use crate::notify::{Handler, SubscriptionRegistry};
use crate::pool::{ConnectionFactory, ConnectionPool};
use crate::protocol::RespFrame;
use crate::state::{ClientState, StateCell};
use crate::topology::{self, Topology};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A failover-aware pooled client for a single Sentinel-managed master.
///
/// Construction bootstraps against the supplied sentinel, resolves the
/// master, and fills the pool; afterwards every detected master move
/// triggers a new resolution cycle transparently.
pub struct SentinelPool {
    inner: Arc<ClientInner>,
    monitor_task: tokio::task::JoinHandle<()>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    state: StateCell,
    topology: Mutex<Topology>,
    /// Current pool generation. Replaced wholesale on every successful
    /// resolution; `None` only before the first resolution completes.
    pool: Mutex<Option<Arc<ConnectionPool>>>,
    factory: Arc<dyn ConnectionFactory>,
    registry: SubscriptionRegistry,
    availability: Arc<AvailabilityFlag>,
}

impl SentinelPool {
    /// Connects to the bootstrap sentinel, verifies its role, discovers the
    /// sentinel set, resolves the master, and fills the pool. Any failure
    /// before the first resolution cycle aborts construction; no partial
    /// client is returned.
    pub async fn new(config: ClientConfig) -> Result<Self, SentinelPoolError> {
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| ClientInner {
            state: StateCell::new(ClientState::Creating),
            topology: Mutex::new(Topology::new(config.sentinel_addr.clone())),
            pool: Mutex::new(None),
            factory: Arc::new(MasterFactory {
                inner: weak.clone(),
            }),
            registry: SubscriptionRegistry::new(config.replay_diagnostics.clone()),
            availability: Arc::new(AvailabilityFlag::new()),
            config,
        });

        inner.bootstrap().await?;
        inner.reset().await;

        let monitor_task = tokio::spawn(monitor::run(
            inner.factory.clone(),
            inner.config.master_name.clone(),
            inner.availability.clone(),
            inner.config.retry_delay,
        ));

        info!("Client ready; master at {}", inner.topology.lock().master());
        Ok(Self {
            inner,
            monitor_task,
        })
    }

    /// Executes one command through the pool: acquire, send, then return the
    /// connection (or discard it on failure). The client does not auto-retry;
    /// callers retry at their own discretion.
    pub async fn execute(&self, args: &[&str]) -> Result<RespFrame, SentinelPoolError> {
        let mut conn = self.acquire().await?;
        match conn.execute(args).await {
            Ok(RespFrame::Error(message)) => {
                self.release(conn);
                Err(SentinelPoolError::ServerError(message))
            }
            Ok(reply) => {
                self.release(conn);
                Ok(reply)
            }
            Err(e) => {
                self.mark_bad(conn);
                Err(e)
            }
        }
    }

    /// Borrows a connection to the current master from the pool.
    pub async fn acquire(&self) -> Result<Connection, SentinelPoolError> {
        self.pool()?.acquire().await
    }

    /// Returns a borrowed connection. While the monitor network considers
    /// the master down the connection is discarded instead of reused.
    pub fn release(&self, conn: Connection) {
        if let Ok(pool) = self.pool() {
            if self.inner.availability.is_up() {
                pool.release(conn);
            } else {
                pool.mark_bad(conn);
            }
        }
    }

    /// Discards a borrowed connection the caller observed failing.
    pub fn mark_bad(&self, conn: Connection) {
        if let Ok(pool) = self.pool() {
            pool.mark_bad(conn);
        }
    }

    /// Subscribes `handler` under `command` (e.g. `SUBSCRIBE`) for the given
    /// keys. The subscription survives failovers: it is replayed against the
    /// new pool after every resolution cycle until unregistered.
    pub async fn register_subscription(
        &self,
        command: &str,
        handler: Handler,
        keys: &[&str],
    ) -> Result<(), SentinelPoolError> {
        self.inner
            .registry
            .register(&self.inner.factory, command, handler, keys)
            .await
    }

    /// Drops the subscriptions for the given keys. Local bookkeeping is
    /// cleared even when a key was not registered (reported as an error).
    pub fn unregister_subscription(
        &self,
        command: &str,
        keys: &[&str],
    ) -> Result<(), SentinelPoolError> {
        self.inner.registry.unregister(command, keys)
    }

    /// Forces a full resolution cycle, e.g. after an externally observed
    /// failure. A no-op when a reset is already in flight.
    pub async fn force_reset(&self) {
        self.inner.reset().await;
    }

    pub fn state(&self) -> ClientState {
        self.inner.state.load()
    }

    /// Whether the monitor network currently considers the master up.
    pub fn is_up(&self) -> bool {
        self.inner.availability.is_up()
    }

    /// The currently resolved master address, if any.
    pub fn master_addr(&self) -> Option<String> {
        let master = self.inner.topology.lock().master().to_string();
        (!master.is_empty()).then_some(master)
    }

    /// Known sentinel addresses in discovered order.
    pub fn known_sentinels(&self) -> Vec<String> {
        self.inner.topology.lock().sentinels().to_vec()
    }

    pub fn preferred_sentinel(&self) -> String {
        self.inner.topology.lock().preferred().to_string()
    }

    /// Number of idle pooled connections; zero while no pool exists yet.
    pub fn idle_connections(&self) -> usize {
        self.pool().map_or(0, |pool| pool.idle_len())
    }

    fn pool(&self) -> Result<Arc<ConnectionPool>, SentinelPoolError> {
        self.inner.pool.lock().clone().ok_or_else(|| {
            SentinelPoolError::InvalidState("no connection pool exists yet".to_string())
        })
    }
}

impl Drop for SentinelPool {
    fn drop(&mut self) {
        self.monitor_task.abort();
    }
}

impl ClientInner {
    /// Synchronous bootstrap: the supplied endpoint is contractually a
    /// sentinel; anything else aborts construction.
    async fn bootstrap(&self) -> Result<(), SentinelPoolError> {
        self.state.store(ClientState::Bootstrapping);
        let addr = self.config.sentinel_addr.clone();

        let mut conn = Connection::connect(&addr).await.map_err(|e| {
            SentinelPoolError::Bootstrap(format!("cannot reach sentinel at {addr}: {e}"))
        })?;
        let role = conn.role().await.map_err(|e| {
            SentinelPoolError::Bootstrap(format!("ROLE query against {addr} failed: {e}"))
        })?;
        if !role.eq_ignore_ascii_case("sentinel") {
            return Err(SentinelPoolError::Bootstrap(format!(
                "{addr} reports role '{role}'; the bootstrap endpoint must be a sentinel"
            )));
        }

        topology::discover(&self.topology, &self.config.master_name)
            .await
            .map_err(|e| {
                SentinelPoolError::Bootstrap(format!("initial sentinel discovery failed: {e}"))
            })?;
        Ok(())
    }

    /// The master resolution loop: drain, clear, poll sentinels until a
    /// candidate verifies as master, rebuild the pool, replay subscriptions.
    /// Retries indefinitely with a fixed delay; re-entrant calls while a
    /// reset is in flight are no-ops.
    pub(crate) async fn reset(&self) {
        if !self.state.try_enter_resetting() {
            debug!("Reset already in flight; skipping");
            return;
        }

        // The old pool stays installed while drained so concurrent borrowers
        // fail fast instead of observing a missing pool.
        if let Some(old) = self.pool.lock().as_ref() {
            old.drain();
        }
        self.topology.lock().clear_master();

        loop {
            tokio::time::sleep(self.config.resync_delay).await;

            let preferred = self.topology.lock().preferred().to_string();
            let mut sentinel = match Connection::connect(&preferred).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!("Failed to dial sentinel {}: {}", preferred, e);
                    self.rediscover().await;
                    continue;
                }
            };

            let addr = match sentinel.master_addr_by_name(&self.config.master_name).await {
                Ok(addr) => addr,
                Err(e) => {
                    debug!("Error getting master address: {}", e);
                    self.rediscover().await;
                    continue;
                }
            };
            let candidate_addr = addr.to_authority();

            // A single unreachable candidate does not imply sentinel
            // staleness, so these failures retry without rediscovery.
            let mut candidate = match Connection::connect(&candidate_addr).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!("Failed to dial master candidate {}: {}", candidate_addr, e);
                    continue;
                }
            };
            let role = match candidate.role().await {
                Ok(role) => role,
                Err(e) => {
                    debug!("Failed to get candidate role: {}", e);
                    continue;
                }
            };
            if !role.eq_ignore_ascii_case("master") {
                debug!("Candidate {} reports role '{}', not master", candidate_addr, role);
                continue;
            }

            info!("Master found at {}", candidate_addr);
            self.topology.lock().set_master(candidate_addr);
            break;
        }

        let pool = Arc::new(ConnectionPool::new(
            self.config.pool_size,
            self.factory.clone(),
            self.config.retry_delay,
        ));
        if let Err(e) = pool.fill().await {
            // The deficit is made up lazily by acquire.
            warn!("Pool fill after resolution stopped early: {}", e);
        }
        *self.pool.lock() = Some(pool);

        self.state.store(ClientState::Healthy);
        self.registry.replay(&self.factory).await;
    }

    /// Discovery invoked from the retry loop is non-fatal: failures are
    /// logged and the loop continues with the current preferred sentinel.
    async fn rediscover(&self) {
        if let Err(e) = topology::discover(&self.topology, &self.config.master_name).await {
            warn!("Sentinel discovery failed: {}", e);
        }
    }

    fn resolved_master(&self) -> Result<String, SentinelPoolError> {
        let master = self.topology.lock().master().to_string();
        if master.is_empty() {
            Err(SentinelPoolError::InvalidState(
                "no master currently resolved".to_string(),
            ))
        } else {
            Ok(master)
        }
    }
}

/// Dials the currently resolved master. A refused connection is the strong
/// signal that the master actually moved (as opposed to a transient blip):
/// it forces one full resolution cycle, then retries the dial exactly once.
/// Any other failure, or a second failure after the forced resolution,
/// surfaces to the pool as a factory error.
struct MasterFactory {
    inner: Weak<ClientInner>,
}

#[async_trait]
impl ConnectionFactory for MasterFactory {
    async fn create(&self) -> Result<Connection, SentinelPoolError> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(SentinelPoolError::ClientGone);
        };
        let addr = inner.resolved_master()?;
        match Connection::connect(&addr).await {
            Ok(conn) => Ok(conn),
            Err(e) if is_refused(&e) => {
                warn!("Connection refused by master at {}; forcing resolution", addr);
                inner.reset().await;
                let addr = inner.resolved_master()?;
                Connection::connect(&addr).await
            }
            Err(e) => Err(e),
        }
    }
}

fn is_refused(err: &SentinelPoolError) -> bool {
    matches!(err, SentinelPoolError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused)
}
