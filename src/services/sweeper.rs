use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::services::queue::JobQueue;
use crate::services::storage::ResultStore;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub delete_failures: usize,
}

/// Periodically evicts terminal jobs older than the TTL, with their artifacts.
pub struct Sweeper {
    queue: Arc<JobQueue>,
    store: Arc<dyn ResultStore>,
    ttl: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<dyn ResultStore>,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            ttl,
            interval,
        }
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Job cleanup worker started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the first sweep waits a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep(Utc::now()).await;
                }
            }
        }
        tracing::info!("Job cleanup worker stopped");
    }

    /// Evict everything that has expired as of `now`.
    ///
    /// Each eviction is independent; a failed artifact delete is logged and
    /// the record is evicted anyway.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expired = self.queue.expired(now, ttl);
        let mut report = SweepReport::default();
        if expired.is_empty() {
            return report;
        }

        tracing::info!(count = expired.len(), "Cleaning up expired jobs");
        for job in expired {
            if let Some(result_ref) = &job.result_ref {
                match self.store.delete(result_ref).await {
                    Ok(()) => {
                        tracing::debug!(job_id = %job.id, result = %result_ref, "Deleted result")
                    }
                    Err(e) => {
                        report.delete_failures += 1;
                        tracing::warn!(
                            job_id = %job.id,
                            result = %result_ref,
                            error = %e,
                            "Could not delete result"
                        );
                    }
                }
            }
            if self.queue.evict(job.id) {
                report.evicted += 1;
            }
        }

        metrics::counter!("generation_jobs_evicted_total").increment(report.evicted as u64);
        tracing::info!(
            evicted = report.evicted,
            delete_failures = report.delete_failures,
            "Cleanup complete"
        );
        report
    }
}
