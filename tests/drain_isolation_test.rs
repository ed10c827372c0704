//! Drain batch behavior: batch limits and per-job failure isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use ingest_worker::extract::{
    ExtractOptions, ExtractionOutcome, ExtractionStrategy, ListingSource, ScanMode,
};
use ingest_worker::observability::metrics::Metrics;
use ingest_worker::pipeline::{DaoPersistStage, ListingCleanStage, ScanPipeline};
use ingest_worker::queue::{DrainWorker, JobStore, MemoryJobStore, NewScrapeJob, ScrapeJobStatus};
use ingest_worker::store::MemoryDao;

/// Fails any keyword containing "broken"; succeeds otherwise with no results.
struct SelectiveStrategy;

#[async_trait]
impl ExtractionStrategy for SelectiveStrategy {
    async fn extract(
        &self,
        keyword: &str,
        _opts: &ExtractOptions,
    ) -> anyhow::Result<ExtractionOutcome> {
        if keyword.contains("broken") {
            anyhow::bail!("simulated extraction outage");
        }
        Ok(ExtractionOutcome {
            listings: vec![],
            pages_scraped: 1,
            source: ListingSource::Dom,
        })
    }

    fn name(&self) -> &'static str {
        "selective"
    }
}

fn worker(jobs: Arc<MemoryJobStore>, batch_size: usize) -> DrainWorker {
    worker_with_staleness(jobs, batch_size, Duration::from_secs(1800))
}

fn worker_with_staleness(
    jobs: Arc<MemoryJobStore>,
    batch_size: usize,
    stale_after: Duration,
) -> DrainWorker {
    let metrics = Metrics::for_tests();
    let mut strategies: HashMap<ScanMode, Arc<dyn ExtractionStrategy>> = HashMap::new();
    strategies.insert(ScanMode::Active, Arc::new(SelectiveStrategy));

    let pipeline = Arc::new(ScanPipeline::new(
        strategies,
        Arc::new(ListingCleanStage::new()),
        Arc::new(DaoPersistStage::new(
            Arc::new(MemoryDao::new()),
            false,
            metrics.clone(),
        )),
        60,
        metrics.clone(),
    ));

    DrainWorker::new(jobs, pipeline, batch_size, Duration::ZERO, stale_after, metrics)
}

async fn enqueue(jobs: &MemoryJobStore, keyword: &str) -> Uuid {
    jobs.enqueue(NewScrapeJob {
        user_id: Uuid::new_v4(),
        keyword: keyword.to_owned(),
        mode: ScanMode::Active,
    })
    .await
    .expect("enqueue")
    .id
}

#[tokio::test]
async fn middle_job_failure_leaves_neighbors_untouched() {
    let jobs = Arc::new(MemoryJobStore::new());
    let first = enqueue(&jobs, "camera").await;
    let second = enqueue(&jobs, "broken lens").await;
    let third = enqueue(&jobs, "keyboard").await;

    let summary = worker(jobs.clone(), 5).drain().await.expect("drain");
    assert_eq!(summary.claimed, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    for (id, expected) in [
        (first, ScrapeJobStatus::Completed),
        (second, ScrapeJobStatus::Failed),
        (third, ScrapeJobStatus::Completed),
    ] {
        let job = jobs.get(id).await.expect("get").expect("exists");
        assert_eq!(job.status, expected, "job {id}");
    }

    let failed = jobs.get(second).await.expect("get").expect("exists");
    assert!(
        failed
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("simulated extraction outage"))
    );
}

#[tokio::test]
async fn drain_claims_at_most_the_batch_size() {
    let jobs = Arc::new(MemoryJobStore::new());
    for index in 0..8 {
        enqueue(&jobs, &format!("keyword {index}")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let w = worker(jobs.clone(), 5);

    let first = w.drain().await.expect("drain");
    assert_eq!(first.claimed, 5);

    let second = w.drain().await.expect("drain");
    assert_eq!(second.claimed, 3);

    let third = w.drain().await.expect("drain");
    assert_eq!(third.claimed, 0);
}

#[tokio::test]
async fn stale_running_jobs_are_recovered_before_claiming() {
    let jobs = Arc::new(MemoryJobStore::new());
    let stale = enqueue(&jobs, "camera").await;

    // Claim the job as a previous, now-dead worker would have.
    jobs.claim_pending_batch(1).await.expect("claim");
    tokio::time::sleep(Duration::from_millis(5)).await;

    // A 1ms staleness cutoff makes the orphaned claim immediately stale.
    let w = worker_with_staleness(jobs.clone(), 5, Duration::from_millis(1));
    let summary = w.drain().await.expect("drain");
    assert_eq!(summary.recovered, 1);

    let job = jobs.get(stale).await.expect("get").expect("exists");
    assert_eq!(job.status, ScrapeJobStatus::Failed);
    assert!(job.error_message.as_deref().is_some_and(|m| m.contains("worker lost")));
}
