use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::PoolRegistry;
use crate::metrics;
use crate::models::Target;

/// Outcome of one idle-reaper pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub closed: usize,
    pub refilled: usize,
    pub refill_failures: usize,
}

/// Outcome of one health probe per target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub target: Target,
    pub healthy: bool,
}

impl PoolRegistry {
    /// Close idle connections unused for longer than `idle_timeout`, then top
    /// every pool back up to `min_connections`. Refill failures are logged and
    /// counted, never returned.
    pub async fn reap_idle(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let idle_timeout = self.config.idle_timeout;

        for pool in self.snapshot() {
            let (closed, deficit) = {
                let mut state = pool.lock();
                let before = state.idle.len();
                let now = Instant::now();
                state
                    .idle
                    .retain(|c| c.conn.is_open() && now.duration_since(c.returned_at) <= idle_timeout);
                let closed = before - state.idle.len();
                state.closed += closed as u64;
                pool.publish(&state);

                let deficit = if state.retired {
                    0
                } else {
                    self.config.min_connections.saturating_sub(state.total())
                };
                (closed, deficit)
            };

            if closed > 0 {
                debug!(target = %pool.target, closed, "Reaped idle connections");
            }
            report.closed += closed;

            if deficit == 0 {
                continue;
            }
            let reserved = pool.reserve(deficit, self.config.max_connections);
            let (created, err) = self.fill(&pool, reserved).await;
            report.refilled += created;
            if let Some(err) = err {
                report.refill_failures += reserved - created;
                warn!(target = %pool.target, error = %err, "Failed to refill pool to minimum");
            }
        }

        report
    }

    /// Borrow one connection per target and ping it within `probe_timeout`.
    ///
    /// Targets whose slots are all busy are skipped. The probed connection is
    /// returned normally; a single failed probe never evicts it.
    pub async fn probe_health(&self) -> Vec<HealthReport> {
        let mut reports = Vec::new();

        for pool in self.snapshot() {
            let target = pool.target.clone();
            let healthy = match self.try_acquire(&target).await {
                Ok(Some(conn)) => {
                    match tokio::time::timeout(self.config.probe_timeout, conn.ping()).await {
                        Ok(Ok(())) => true,
                        Ok(Err(err)) => {
                            warn!(target = %target, error = %err, "Health probe failed");
                            false
                        }
                        Err(_) => {
                            warn!(target = %target, "Health probe timed out");
                            false
                        }
                    }
                }
                Ok(None) => {
                    debug!(target = %target, "Pool busy, skipping health probe");
                    continue;
                }
                Err(err) => {
                    warn!(target = %target, error = %err, "Health probe could not connect");
                    false
                }
            };

            metrics::health_probe(&target, healthy);
            reports.push(HealthReport { target, healthy });
        }

        reports.sort_by(|a, b| a.target.cmp(&b.target));
        reports
    }

    /// Run the idle reaper and the health prober on their intervals until
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut reaper = tokio::time::interval(registry.config.reaper_interval);
            let mut health = tokio::time::interval(registry.config.health_check_interval);
            reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);
            health.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Both intervals fire immediately; skip that first tick.
            reaper.tick().await;
            health.tick().await;

            info!(
                reaper_interval_secs = registry.config.reaper_interval.as_secs(),
                health_interval_secs = registry.config.health_check_interval.as_secs(),
                "Pool maintenance started"
            );

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = reaper.tick() => {
                        let report = registry.reap_idle().await;
                        debug!(
                            closed = report.closed,
                            refilled = report.refilled,
                            refill_failures = report.refill_failures,
                            "Idle reaper pass finished"
                        );
                    }
                    _ = health.tick() => {
                        let reports = registry.probe_health().await;
                        let unhealthy = reports.iter().filter(|r| !r.healthy).count();
                        debug!(probed = reports.len(), unhealthy, "Health probe pass finished");
                    }
                }
            }

            info!("Pool maintenance stopped");
        })
    }
}
