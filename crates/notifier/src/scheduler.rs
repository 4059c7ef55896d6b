//! Per-tenant scheduler.
//!
//! A fixed 1-second driver tick checks every known tenant against its
//! configured poll interval and runs one delivery pass for each tenant that
//! is due. Staleness is bounded to at most one driver period beyond the
//! configured interval.
//!
//! The `last_poll` map is transient, per-process state: losing it on restart
//! only causes one extra immediate poll per tenant. Passes run sequentially
//! within a process, so a tenant never races with itself here; across
//! processes the store's atomic claim is the safety net.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use herald_store::{ConfigSource, DeliveryStore, IdentityResolver, TenantDirectory};

use crate::messenger::Messenger;
use crate::sender::DeliveryEngine;

/// Fixed period of the driver tick.
pub const DRIVER_PERIOD: Duration = Duration::from_secs(1);

/// Hard floor on the per-tenant poll interval, bounding load even if a
/// tenant's configuration is corrupted.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Recurring per-tenant delivery scheduler.
pub struct Scheduler<S, M> {
    store: Arc<S>,
    engine: DeliveryEngine<S, M>,
    last_poll: HashMap<String, Instant>,
}

impl<S, M> Scheduler<S, M>
where
    S: DeliveryStore + IdentityResolver + ConfigSource + TenantDirectory,
    M: Messenger,
{
    pub fn new(store: Arc<S>, messenger: Arc<M>, batch_limit: i64) -> Self {
        let engine = DeliveryEngine::new(store.clone(), messenger, batch_limit);
        Self {
            store,
            engine,
            last_poll: HashMap::new(),
        }
    }

    /// Check every known tenant and run a delivery pass for each one whose
    /// interval has elapsed. Returns the number of passes run.
    ///
    /// A failure in one tenant's pass is logged and does not affect the other
    /// tenants in the same tick.
    pub async fn tick(&mut self) -> anyhow::Result<usize> {
        let now = Instant::now();
        let tenants = self.store.tenants().await?;
        let mut passes = 0;

        for tenant in tenants {
            let cfg = match self.store.effective(&tenant).await {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(tenant = %tenant, error = %e, "Failed to resolve tenant config");
                    continue;
                }
            };

            let interval = cfg.poll_interval().max(MIN_POLL_INTERVAL);
            let due = self
                .last_poll
                .get(&tenant)
                .is_none_or(|last| now.duration_since(*last) >= interval);
            if !due {
                continue;
            }

            // Mark the poll before the pass so a slow or failing pass cannot
            // shorten the next window.
            self.last_poll.insert(tenant.clone(), now);
            match self.engine.process_tenant(&cfg).await {
                Ok(summary) => {
                    passes += 1;
                    if summary.claimed > 0 {
                        tracing::info!(
                            tenant = %tenant,
                            claimed = summary.claimed,
                            recipients = summary.recipients,
                            delivered = summary.delivered,
                            failed = summary.failed,
                            released = summary.released,
                            "Delivery pass complete"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(tenant = %tenant, error = %e, "Delivery pass failed");
                }
            }
        }

        Ok(passes)
    }

    /// Drive the scheduler until the task is cancelled. The first driver tick
    /// fires immediately, giving one pass at startup.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!(
            driver_period_ms = DRIVER_PERIOD.as_millis() as u64,
            min_poll_interval_secs = MIN_POLL_INTERVAL.as_secs(),
            "Notification scheduler started"
        );

        let mut driver = tokio::time::interval(DRIVER_PERIOD);
        loop {
            driver.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
        }
    }
}
