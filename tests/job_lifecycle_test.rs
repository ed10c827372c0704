//! End-to-end job lifecycle through the queue, pipeline and store, using the
//! in-memory backends. No database or network required.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use ingest_worker::extract::{
    ExtractOptions, ExtractionOutcome, ExtractionStrategy, ListingSource, RawListing, ScanMode,
};
use ingest_worker::observability::metrics::Metrics;
use ingest_worker::pipeline::{DaoPersistStage, ListingCleanStage, ScanPipeline};
use ingest_worker::queue::{DrainWorker, JobStore, MemoryJobStore, NewScrapeJob, ScrapeJobStatus};
use ingest_worker::store::{ListingDao, MemoryDao};

/// Serves a canned result per keyword: "empty" yields no listings, anything
/// else yields two.
struct CannedStrategy;

fn raw(keyword: &str, suffix: &str, price: &str) -> RawListing {
    RawListing {
        keyword: keyword.to_owned(),
        item_url: format!("https://www.ebay.com/itm/{suffix}"),
        title: format!("{keyword} listing {suffix}"),
        price_text: price.to_owned(),
        shipping_text: "Free shipping".to_owned(),
        bids_text: String::new(),
        sold_date_text: String::new(),
        image_url: None,
        source: ListingSource::Api,
    }
}

#[async_trait]
impl ExtractionStrategy for CannedStrategy {
    async fn extract(
        &self,
        keyword: &str,
        _opts: &ExtractOptions,
    ) -> anyhow::Result<ExtractionOutcome> {
        let listings = if keyword == "empty" {
            vec![]
        } else {
            vec![raw(keyword, "100", "$25.00"), raw(keyword, "200", "$75.50")]
        };
        Ok(ExtractionOutcome {
            listings,
            pages_scraped: 1,
            source: ListingSource::Api,
        })
    }

    fn name(&self) -> &'static str {
        "canned"
    }
}

struct Harness {
    jobs: Arc<MemoryJobStore>,
    dao: Arc<MemoryDao>,
    worker: DrainWorker,
}

fn harness() -> Harness {
    let metrics = Metrics::for_tests();
    let jobs = Arc::new(MemoryJobStore::new());
    let dao = Arc::new(MemoryDao::new());

    let mut strategies: HashMap<ScanMode, Arc<dyn ExtractionStrategy>> = HashMap::new();
    strategies.insert(ScanMode::Active, Arc::new(CannedStrategy));
    strategies.insert(ScanMode::Sold, Arc::new(CannedStrategy));

    let pipeline = Arc::new(ScanPipeline::new(
        strategies,
        Arc::new(ListingCleanStage::new()),
        Arc::new(DaoPersistStage::new(dao.clone(), false, metrics.clone())),
        60,
        metrics.clone(),
    ));

    let worker = DrainWorker::new(
        jobs.clone(),
        pipeline,
        5,
        Duration::ZERO,
        Duration::from_secs(1800),
        metrics,
    );

    Harness { jobs, dao, worker }
}

async fn enqueue(jobs: &MemoryJobStore, keyword: &str, mode: ScanMode) -> Uuid {
    jobs.enqueue(NewScrapeJob {
        user_id: Uuid::new_v4(),
        keyword: keyword.to_owned(),
        mode,
    })
    .await
    .expect("enqueue")
    .id
}

#[tokio::test]
async fn scan_runs_from_pending_to_completed_with_listings() {
    let h = harness();
    let job_id = enqueue(&h.jobs, "vintage camera", ScanMode::Active).await;

    let summary = h.worker.drain().await.expect("drain");
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 1);

    let job = h.jobs.get(job_id).await.expect("get").expect("exists");
    assert_eq!(job.status, ScrapeJobStatus::Completed);
    assert_eq!(job.items_found, 2);
    assert_eq!(job.pages_scraped, 1);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let listings = h.dao.listings_for_scan(job_id).await.expect("fetch");
    assert_eq!(listings.len(), 2);
    assert!(listings.iter().all(|l| l.currency == "USD"));
    assert!(listings.iter().all(|l| l.scan_job_id == job_id));
    assert_eq!(listings[0].sold_price, Some(25.0));
}

#[tokio::test]
async fn empty_result_completes_with_zero_items() {
    let h = harness();
    let job_id = enqueue(&h.jobs, "empty", ScanMode::Active).await;

    h.worker.drain().await.expect("drain");

    let job = h.jobs.get(job_id).await.expect("get").expect("exists");
    assert_eq!(job.status, ScrapeJobStatus::Completed);
    assert_eq!(job.items_found, 0);
    assert!(job.error_message.is_none());
    assert!(h.dao.listings_for_scan(job_id).await.expect("fetch").is_empty());
}

#[tokio::test]
async fn blank_keyword_job_fails_with_a_recorded_reason() {
    let h = harness();
    let job_id = enqueue(&h.jobs, "   ", ScanMode::Active).await;

    let summary = h.worker.drain().await.expect("drain");
    assert_eq!(summary.failed, 1);

    let job = h.jobs.get(job_id).await.expect("get").expect("exists");
    assert_eq!(job.status, ScrapeJobStatus::Failed);
    assert!(job.error_message.as_deref().is_some_and(|m| m.contains("keyword")));
}

#[tokio::test]
async fn spawned_drain_completes_a_fresh_submission() {
    let Harness { jobs, worker, .. } = harness();
    let job_id = enqueue(&jobs, "vintage camera", ScanMode::Active).await;

    // Submission fires the drain on a background task rather than waiting for
    // the scheduled cycle.
    let handle = tokio::spawn(async move { worker.drain().await });
    let summary = handle.await.expect("task joins").expect("drain");
    assert_eq!(summary.completed, 1);

    let job = jobs.get(job_id).await.expect("get").expect("exists");
    assert_eq!(job.status, ScrapeJobStatus::Completed);
}

#[tokio::test]
async fn repeat_drain_does_not_rerun_finished_jobs() {
    let h = harness();
    enqueue(&h.jobs, "vintage camera", ScanMode::Active).await;

    let first = h.worker.drain().await.expect("drain");
    assert_eq!(first.claimed, 1);

    let second = h.worker.drain().await.expect("drain");
    assert_eq!(second.claimed, 0);
    assert_eq!(second.completed, 0);
}
