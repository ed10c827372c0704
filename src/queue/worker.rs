//! Drain worker: claims pending jobs in batches and runs each through the
//! scan pipeline. One job's failure never stops the batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::observability::metrics::Metrics;
use crate::pipeline::ScanPipeline;

use super::store::JobStore;
use super::types::ScrapeJob;

/// What one drain cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Stale 'running' jobs failed before claiming, left over from a crash.
    pub recovered: u64,
}

pub struct DrainWorker {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<ScanPipeline>,
    batch_size: usize,
    job_pause: Duration,
    stale_after: Duration,
    metrics: Arc<Metrics>,
}

impl DrainWorker {
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<ScanPipeline>,
        batch_size: usize,
        job_pause: Duration,
        stale_after: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            jobs,
            pipeline,
            batch_size: batch_size.max(1),
            job_pause,
            stale_after,
            metrics,
        }
    }

    /// Run one drain cycle: recover stale jobs, claim a batch, process it.
    ///
    /// # Errors
    /// Only store failures while claiming. Individual job failures are
    /// recorded on the job row and reflected in the summary.
    pub async fn drain(&self) -> Result<DrainSummary> {
        self.metrics.record_drain_cycle();

        let recovered = match self.jobs.fail_stale_running(self.stale_after).await {
            Ok(count) => {
                if count > 0 {
                    warn!(count, "failed stale running jobs from a previous worker");
                }
                count
            }
            Err(error) => {
                // Recovery is best effort; the batch can still drain.
                warn!(%error, "stale job recovery failed");
                0
            }
        };

        let batch = self.jobs.claim_pending_batch(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(DrainSummary {
                recovered,
                ..DrainSummary::default()
            });
        }

        info!(claimed = batch.len(), "claimed pending jobs");

        let mut summary = DrainSummary {
            claimed: batch.len(),
            recovered,
            ..DrainSummary::default()
        };

        let last_index = batch.len() - 1;
        for (index, job) in batch.iter().enumerate() {
            if self.run_job(job).await {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }

            // Spacing between jobs avoids bursty upstream traffic.
            if index < last_index && !self.job_pause.is_zero() {
                sleep(self.job_pause).await;
            }
        }

        info!(
            claimed = summary.claimed,
            completed = summary.completed,
            failed = summary.failed,
            recovered = summary.recovered,
            "drain cycle finished"
        );

        Ok(summary)
    }

    /// Run a single claimed job to its terminal state. Returns whether the
    /// job completed.
    async fn run_job(&self, job: &ScrapeJob) -> bool {
        let started = Instant::now();

        match self.pipeline.run_scan(job).await {
            Ok(outcome) => {
                if let Err(error) = self
                    .jobs
                    .mark_completed(job.id, outcome.items_found, outcome.pages_scraped)
                    .await
                {
                    error!(job_id = %job.id, %error, "failed to record job completion");
                }
                self.metrics.record_job_outcome("completed");
                self.metrics
                    .observe_job_duration(started.elapsed().as_secs_f64());
                true
            }
            Err(scan_error) => {
                error!(job_id = %job.id, error = %format!("{scan_error:#}"), "scan failed");
                if let Err(error) = self
                    .jobs
                    .mark_failed(job.id, &format!("{scan_error:#}"))
                    .await
                {
                    error!(job_id = %job.id, %error, "failed to record job failure");
                }
                self.metrics.record_job_outcome("failed");
                self.metrics
                    .observe_job_duration(started.elapsed().as_secs_f64());
                false
            }
        }
    }
}
