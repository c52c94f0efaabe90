//! Polling dispatcher that moves claimed rows through a delivery sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ledger_database::{Database, OutboxStatus, RetryPolicy};

use crate::error::OutboxResult;
use crate::sink::DeliverySink;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum rows claimed per poll cycle.
    pub batch_size: usize,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Age after which another dispatcher may take over a claim.
    pub claim_timeout: Duration,
    /// Retry budget and backoff shape for failed deliveries.
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(1),
            claim_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for one poll cycle (or one flush).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl DrainStats {
    fn merge(&mut self, other: DrainStats) {
        self.claimed += other.claimed;
        self.delivered += other.delivered;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Claims batches of pending rows and hands them to the sink in row order.
///
/// Multiple dispatchers may run against the same database file; claims keep
/// their batches disjoint. Each instance gets a unique worker id, so a
/// restart never inherits stale claims by name; those age out through the
/// claim timeout instead.
pub struct Dispatcher {
    db: Arc<Database>,
    sink: Arc<dyn DeliverySink>,
    config: DispatcherConfig,
    worker_id: String,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(db: Arc<Database>, sink: Arc<dyn DeliverySink>, config: DispatcherConfig) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let worker_id = format!("ledgerd-{}-{}", std::process::id(), &suffix[..8]);

        Self {
            db,
            sink,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim one batch and deliver it row by row.
    ///
    /// A failed row never blocks the rest of its batch; its outcome is
    /// recorded and delivery moves on.
    pub async fn run_once(&self) -> OutboxResult<DrainStats> {
        self.drain_batch(None).await
    }

    /// Claim one batch and deliver until done or `stop` flips to true.
    ///
    /// On stop, the delivery in flight completes and the remaining rows keep
    /// their claim; the caller is responsible for releasing them.
    async fn drain_batch(
        &self,
        stop: Option<&watch::Receiver<bool>>,
    ) -> OutboxResult<DrainStats> {
        let rows = self.db.claim_batch(
            &self.worker_id,
            self.config.batch_size,
            self.config.claim_timeout,
        )?;

        let mut stats = DrainStats {
            claimed: rows.len(),
            ..DrainStats::default()
        };

        for row in &rows {
            if let Some(stop) = stop {
                if *stop.borrow() {
                    break;
                }
            }
            match self.sink.deliver(row).await {
                Ok(()) => {
                    self.db.mark_processed(row.id)?;
                    stats.delivered += 1;
                    debug!(id = row.id, event_type = %row.event_type, "Delivered event");
                }
                Err(e) if e.is_retryable() => {
                    let status = self.db.mark_failed(row.id, &e.to_string(), &self.config.retry)?;
                    if status == OutboxStatus::DeadLetter {
                        stats.dead_lettered += 1;
                        warn!(id = row.id, error = %e, "Retries exhausted, dead-lettered");
                    } else {
                        stats.retried += 1;
                        debug!(
                            id = row.id,
                            attempts = row.attempts + 1,
                            error = %e,
                            "Delivery failed, scheduled retry"
                        );
                    }
                }
                Err(e) => {
                    self.db.mark_dead_letter(row.id, &e.to_string())?;
                    stats.dead_lettered += 1;
                    warn!(id = row.id, error = %e, "Permanent failure, dead-lettered");
                }
            }
        }

        Ok(stats)
    }

    /// Deliver until no claimable rows remain.
    ///
    /// Rows pushed into future backoff by a failure are left behind; flushing
    /// does not wait out retry schedules. A store error aborts the drain, but
    /// rows still claimed are released first so other workers do not have to
    /// wait out the claim timeout.
    pub async fn flush(&self) -> OutboxResult<DrainStats> {
        let mut total = DrainStats::default();
        loop {
            match self.run_once().await {
                Ok(stats) if stats.claimed == 0 => return Ok(total),
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    if let Err(release_err) = self.db.release_claims(&self.worker_id) {
                        warn!(error = %release_err, "Failed to release claims");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Poll until `shutdown` flips to true, then release any claims still
    /// held and return. The delivery in flight finishes first; claimed rows
    /// not yet delivered are released for other workers.
    ///
    /// Store errors during a poll cycle are logged and retried on the next
    /// tick; only shutdown ends the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> OutboxResult<()> {
        info!(worker_id = %self.worker_id, "Dispatcher started");

        self.poll_until_shutdown(&mut shutdown).await;

        let released = self.db.release_claims(&self.worker_id)?;
        info!(worker_id = %self.worker_id, released, "Dispatcher stopped");
        Ok(())
    }

    async fn poll_until_shutdown(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Separate handle for mid-batch stop checks; `shutdown` itself is
        // mutably borrowed by `changed()` inside the select
        let stop = shutdown.clone();

        loop {
            if *shutdown.borrow() {
                return;
            }

            tokio::select! {
                _ = interval.tick() => {
                    match self.drain_batch(Some(&stop)).await {
                        Ok(stats) => {
                            if stats.claimed > 0 {
                                debug!(
                                    claimed = stats.claimed,
                                    delivered = stats.delivered,
                                    retried = stats.retried,
                                    dead_lettered = stats.dead_lettered,
                                    "Completed poll cycle"
                                );
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Poll cycle failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
