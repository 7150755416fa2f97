//! Per-target connection pooling.
//!
//! [`PoolRegistry`] owns one [`TargetPool`] per [`Target`], created lazily on
//! first use. Each pool guards its state with its own mutex, held only around
//! in-memory bookkeeping and never across a network call. Idle connections are
//! reused LIFO so the warmest session is handed out first.

mod guard;
mod maintenance;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendConnection, ConnectionFactory};
use crate::config::PoolConfig;
use crate::error::{VectorError, VectorResult};
use crate::metrics;
use crate::models::Target;

pub use guard::PooledConnection;
pub use maintenance::{HealthReport, ReapReport};

use guard::Reservation;

/// Point-in-time view of one target's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub target: Target,
    pub idle: usize,
    pub active: usize,
    /// Connections being opened right now
    pub pending: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub created: u64,
    pub closed: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.idle + self.active + self.pending
    }
}

struct IdleConnection {
    id: u64,
    conn: Arc<dyn BackendConnection>,
    returned_at: Instant,
}

#[derive(Default)]
struct PoolState {
    /// LIFO stack: push on release, pop on acquire
    idle: Vec<IdleConnection>,
    active: HashSet<u64>,
    pending: usize,
    total_requests: u64,
    failed_requests: u64,
    created: u64,
    closed: u64,
    last_used: Option<DateTime<Utc>>,
    /// Set once the target is removed; returned connections are closed
    retired: bool,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.pending
    }
}

enum Checkout {
    Idle(u64, Arc<dyn BackendConnection>),
    Reserved,
    Full,
}

pub(crate) struct TargetPool {
    target: Target,
    state: Mutex<PoolState>,
}

impl TargetPool {
    fn new(target: Target) -> Self {
        Self {
            target,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PoolState) {
        metrics::pool_connections(&self.target, state.idle.len(), state.active.len());
    }

    fn record_request(&self) {
        self.lock().total_requests += 1;
    }

    fn record_failure(&self) {
        self.lock().failed_requests += 1;
    }

    /// Pop the most recently returned open connection, or reserve a slot for a
    /// new one if the pool has room.
    fn checkout(&self, max_connections: usize) -> Checkout {
        let mut state = self.lock();

        while let Some(idle) = state.idle.pop() {
            if idle.conn.is_open() {
                state.active.insert(idle.id);
                self.publish(&state);
                return Checkout::Idle(idle.id, idle.conn);
            }
            state.closed += 1;
            debug!(target = %self.target, conn = idle.id, "Dropping closed idle connection");
        }

        if state.total() < max_connections {
            state.pending += 1;
            return Checkout::Reserved;
        }
        Checkout::Full
    }

    /// Reserve up to `n` slots without exceeding `max_connections`.
    fn reserve(&self, n: usize, max_connections: usize) -> usize {
        let mut state = self.lock();
        let granted = n.min(max_connections.saturating_sub(state.total()));
        state.pending += granted;
        granted
    }

    fn activate_reserved(&self, id: u64) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        state.created += 1;
        state.active.insert(id);
        self.publish(&state);
    }

    fn park_reserved(&self, id: u64, conn: Arc<dyn BackendConnection>) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        state.created += 1;
        if state.retired {
            state.closed += 1;
        } else {
            state.idle.push(IdleConnection {
                id,
                conn,
                returned_at: Instant::now(),
            });
        }
        self.publish(&state);
    }

    fn cancel_reservation(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    fn release(&self, id: u64, conn: Arc<dyn BackendConnection>, discard: bool) {
        let mut state = self.lock();
        if !state.active.remove(&id) {
            return;
        }
        state.last_used = Some(Utc::now());

        if state.retired || discard || !conn.is_open() {
            state.closed += 1;
            debug!(target = %self.target, conn = id, "Closing released connection");
        } else {
            state.idle.push(IdleConnection {
                id,
                conn,
                returned_at: Instant::now(),
            });
        }
        self.publish(&state);
    }

    /// Close up to `n` idle connections, oldest first.
    fn shrink_idle(&self, n: usize) -> usize {
        let mut state = self.lock();
        let n = n.min(state.idle.len());
        state.idle.drain(..n);
        state.closed += n as u64;
        self.publish(&state);
        n
    }

    fn retire(&self) {
        let mut state = self.lock();
        state.retired = true;
        state.closed += state.idle.len() as u64;
        state.idle.clear();
        self.publish(&state);
    }

    fn stats(&self, config: &PoolConfig) -> PoolStats {
        let state = self.lock();
        PoolStats {
            target: self.target.clone(),
            idle: state.idle.len(),
            active: state.active.len(),
            pending: state.pending,
            min_connections: config.min_connections,
            max_connections: config.max_connections,
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
            created: state.created,
            closed: state.closed,
            last_used: state.last_used,
        }
    }
}

/// Owns the pools of every target the engine has talked to.
pub struct PoolRegistry {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    pools: RwLock<HashMap<Target, Arc<TargetPool>>>,
    next_id: AtomicU64,
}

impl PoolRegistry {
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            config,
            factory,
            pools: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn existing(&self, target: &Target) -> Option<Arc<TargetPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    fn pool_for(&self, target: &Target) -> Arc<TargetPool> {
        if let Some(pool) = self.existing(target) {
            return pool;
        }

        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(pools.entry(target.clone()).or_insert_with(|| {
            info!(
                target = %target,
                max_connections = self.config.max_connections,
                "Created connection pool"
            );
            Arc::new(TargetPool::new(target.clone()))
        }))
    }

    fn snapshot(&self) -> Vec<Arc<TargetPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Open one backend session, bounded by `connection_timeout`.
    async fn open(&self, target: &Target) -> VectorResult<(u64, Arc<dyn BackendConnection>)> {
        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, self.factory.connect(target)).await {
            Ok(Ok(conn)) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(target = %target, conn = id, "Opened connection");
                Ok((id, Arc::from(conn)))
            }
            Ok(Err(err @ VectorError::Connection { .. })) => Err(err),
            Ok(Err(err)) => Err(VectorError::backend_unreachable(target, err.to_string())),
            Err(_) => Err(VectorError::backend_unreachable(
                target,
                format!("connect timed out after {:?}", timeout),
            )),
        }
    }

    /// Borrow a connection for `target`.
    ///
    /// Reuses the most recently released idle connection, opens a new one when
    /// below `max_connections`, and otherwise polls until `acquire_timeout`
    /// before failing with `PoolExhausted`. Creation failures surface as
    /// `BackendUnreachable` and are not retried here.
    pub async fn acquire(&self, target: &Target) -> VectorResult<PooledConnection> {
        let pool = self.pool_for(target);
        pool.record_request();

        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;

        loop {
            match pool.checkout(self.config.max_connections) {
                Checkout::Idle(id, conn) => {
                    metrics::pool_acquire(target, "reused", started.elapsed());
                    return Ok(PooledConnection::new(Arc::clone(&pool), id, conn));
                }
                Checkout::Reserved => {
                    let reservation = Reservation::claimed(Arc::clone(&pool));
                    return match self.open(target).await {
                        Ok((id, conn)) => {
                            metrics::pool_acquire(target, "created", started.elapsed());
                            Ok(reservation.into_active(id, conn))
                        }
                        Err(err) => {
                            drop(reservation);
                            pool.record_failure();
                            metrics::pool_acquire(target, "unreachable", started.elapsed());
                            warn!(target = %target, error = %err, "Failed to open connection");
                            Err(err)
                        }
                    };
                }
                Checkout::Full => {}
            }

            let now = Instant::now();
            if now >= deadline {
                pool.record_failure();
                metrics::pool_acquire(target, "exhausted", started.elapsed());
                warn!(
                    target = %target,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Connection pool exhausted"
                );
                return Err(VectorError::pool_exhausted(
                    target,
                    format!(
                        "all {} connections busy for {:?}",
                        self.config.max_connections, self.config.acquire_timeout
                    ),
                ));
            }

            let wait = self.config.acquire_poll_interval.min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// Single non-waiting checkout. `Ok(None)` when every slot is busy.
    async fn try_acquire(&self, target: &Target) -> VectorResult<Option<PooledConnection>> {
        let pool = self.pool_for(target);
        match pool.checkout(self.config.max_connections) {
            Checkout::Idle(id, conn) => Ok(Some(PooledConnection::new(pool, id, conn))),
            Checkout::Reserved => {
                let reservation = Reservation::claimed(Arc::clone(&pool));
                let (id, conn) = self.open(target).await?;
                Ok(Some(reservation.into_active(id, conn)))
            }
            Checkout::Full => Ok(None),
        }
    }

    /// Open `n` already-reserved idle connections concurrently.
    ///
    /// Returns how many were created and the first error, if any.
    async fn fill(
        &self,
        pool: &Arc<TargetPool>,
        n: usize,
    ) -> (usize, Option<VectorError>) {
        let reservations: Vec<Reservation> = (0..n)
            .map(|_| Reservation::claimed(Arc::clone(pool)))
            .collect();
        let opened = futures::future::join_all((0..n).map(|_| self.open(&pool.target))).await;

        let mut created = 0;
        let mut first_err = None;
        for (reservation, result) in reservations.into_iter().zip(opened) {
            match result {
                Ok((id, conn)) => {
                    reservation.into_idle(id, conn);
                    created += 1;
                }
                Err(err) => {
                    drop(reservation);
                    first_err.get_or_insert(err);
                }
            }
        }
        (created, first_err)
    }

    /// Resize the pool for `target` towards `desired` connections.
    ///
    /// `desired` is clamped to `max_connections`. Growing opens idle
    /// connections; shrinking closes idle connections only, so active
    /// borrowers are never interrupted.
    pub async fn scale(&self, target: &Target, desired: usize) -> VectorResult<PoolStats> {
        let pool = self.pool_for(target);
        let desired = desired.min(self.config.max_connections);
        let current = pool.lock().total();

        if desired > current {
            let reserved = pool.reserve(desired - current, self.config.max_connections);
            let (created, err) = self.fill(&pool, reserved).await;
            info!(target = %target, desired, created, "Scaled pool up");
            if let Some(err) = err {
                return Err(err);
            }
        } else if desired < current {
            let closed = pool.shrink_idle(current - desired);
            info!(target = %target, desired, closed, "Scaled pool down");
        }

        Ok(pool.stats(&self.config))
    }

    pub fn status(&self, target: &Target) -> Option<PoolStats> {
        self.existing(target).map(|pool| pool.stats(&self.config))
    }

    /// Stats of every pool, sorted by target.
    pub fn statuses(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .snapshot()
            .iter()
            .map(|pool| pool.stats(&self.config))
            .collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }

    /// Forget `target`, closing its idle connections. Connections still
    /// borrowed are closed when released.
    pub fn remove_target(&self, target: &Target) -> bool {
        let removed = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);

        match removed {
            Some(pool) => {
                pool.retire();
                info!(target = %target, "Removed connection pool");
                true
            }
            None => false,
        }
    }
}
