/// Prometheusメトリクスの定義と記録。
use anyhow::{Context, Result};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug)]
pub struct Metrics {
    jobs_total: IntCounterVec,
    listings_persisted_total: IntCounter,
    pages_scraped_total: IntCounter,
    retry_attempts_total: IntCounter,
    rate_limit_warnings_total: IntCounterVec,
    rate_limit_blocked_total: IntCounterVec,
    drain_cycles_total: IntCounter,
    job_duration_seconds: Histogram,
}

impl Metrics {
    /// メトリクスを作成し、レジストリに登録する。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn new(registry: &Registry) -> Result<Self> {
        let jobs_total = IntCounterVec::new(
            Opts::new("ingest_jobs_total", "Scrape jobs by terminal outcome"),
            &["outcome"],
        )
        .context("failed to create ingest_jobs_total")?;
        let listings_persisted_total = IntCounter::new(
            "ingest_listings_persisted_total",
            "Clean listings written to the store",
        )
        .context("failed to create ingest_listings_persisted_total")?;
        let pages_scraped_total = IntCounter::new(
            "ingest_pages_scraped_total",
            "Search result pages fetched across all strategies",
        )
        .context("failed to create ingest_pages_scraped_total")?;
        let retry_attempts_total = IntCounter::new(
            "ingest_retry_attempts_total",
            "Retry attempts performed by the retry executor",
        )
        .context("failed to create ingest_retry_attempts_total")?;
        let rate_limit_warnings_total = IntCounterVec::new(
            Opts::new(
                "ingest_rate_limit_warnings_total",
                "Calls recorded above the 80% budget threshold",
            ),
            &["service"],
        )
        .context("failed to create ingest_rate_limit_warnings_total")?;
        let rate_limit_blocked_total = IntCounterVec::new(
            Opts::new(
                "ingest_rate_limit_blocked_total",
                "Calls refused because the daily budget was exhausted",
            ),
            &["service"],
        )
        .context("failed to create ingest_rate_limit_blocked_total")?;
        let drain_cycles_total = IntCounter::new(
            "ingest_drain_cycles_total",
            "Completed queue drain cycles",
        )
        .context("failed to create ingest_drain_cycles_total")?;
        let job_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "ingest_job_duration_seconds",
            "Wall-clock duration of one scrape job",
        ))
        .context("failed to create ingest_job_duration_seconds")?;

        registry
            .register(Box::new(jobs_total.clone()))
            .context("failed to register ingest_jobs_total")?;
        registry
            .register(Box::new(listings_persisted_total.clone()))
            .context("failed to register ingest_listings_persisted_total")?;
        registry
            .register(Box::new(pages_scraped_total.clone()))
            .context("failed to register ingest_pages_scraped_total")?;
        registry
            .register(Box::new(retry_attempts_total.clone()))
            .context("failed to register ingest_retry_attempts_total")?;
        registry
            .register(Box::new(rate_limit_warnings_total.clone()))
            .context("failed to register ingest_rate_limit_warnings_total")?;
        registry
            .register(Box::new(rate_limit_blocked_total.clone()))
            .context("failed to register ingest_rate_limit_blocked_total")?;
        registry
            .register(Box::new(drain_cycles_total.clone()))
            .context("failed to register ingest_drain_cycles_total")?;
        registry
            .register(Box::new(job_duration_seconds.clone()))
            .context("failed to register ingest_job_duration_seconds")?;

        Ok(Self {
            jobs_total,
            listings_persisted_total,
            pages_scraped_total,
            retry_attempts_total,
            rate_limit_warnings_total,
            rate_limit_blocked_total,
            drain_cycles_total,
            job_duration_seconds,
        })
    }

    /// テスト用に未登録のメトリクスを作成する。
    #[must_use]
    pub fn for_tests() -> std::sync::Arc<Self> {
        let registry = Registry::new();
        std::sync::Arc::new(Self::new(&registry).expect("metrics construction is infallible"))
    }

    pub fn record_job_outcome(&self, outcome: &str) {
        self.jobs_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_listings_persisted(&self, count: u64) {
        self.listings_persisted_total.inc_by(count);
    }

    pub fn record_pages_scraped(&self, count: u64) {
        self.pages_scraped_total.inc_by(count);
    }

    pub fn record_retry_attempt(&self) {
        self.retry_attempts_total.inc();
    }

    pub fn record_rate_limit_warning(&self, service: &str) {
        self.rate_limit_warnings_total
            .with_label_values(&[service])
            .inc();
    }

    pub fn record_rate_limit_blocked(&self, service: &str) {
        self.rate_limit_blocked_total
            .with_label_values(&[service])
            .inc();
    }

    pub fn record_drain_cycle(&self) {
        self.drain_cycles_total.inc();
    }

    pub fn observe_job_duration(&self, seconds: f64) {
        self.job_duration_seconds.observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::for_tests();

        metrics.record_job_outcome("completed");
        metrics.record_job_outcome("completed");
        metrics.record_job_outcome("failed");
        metrics.record_listings_persisted(12);

        assert_eq!(
            metrics.jobs_total.with_label_values(&["completed"]).get(),
            2
        );
        assert_eq!(metrics.jobs_total.with_label_values(&["failed"]).get(), 1);
        assert_eq!(metrics.listings_persisted_total.get(), 12);
    }
}
