//! Scan pipeline: validate -> extract -> clean -> persist.
//!
//! The pipeline runs one claimed job to a result; the drain worker owns the
//! surrounding state transitions. Stages are trait objects so tests can swap
//! any of them out.

pub mod clean;
pub mod persist;
pub mod quota;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::extract::{ExtractOptions, ExtractionStrategy, ListingSource, ScanMode};
use crate::observability::metrics::Metrics;
use crate::queue::ScrapeJob;

pub use clean::{CleanStage, ListingCleanStage};
pub use persist::{DaoPersistStage, PersistStage};
pub use quota::{DailyScanQuota, QuotaDecision, QuotaGate};

const MAX_KEYWORD_LEN: usize = 200;

/// What one successful scan produced.
#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    pub items_found: i32,
    pub pages_scraped: i32,
    pub source: ListingSource,
}

pub struct ScanPipeline {
    strategies: HashMap<ScanMode, Arc<dyn ExtractionStrategy>>,
    clean: Arc<dyn CleanStage>,
    persist: Arc<dyn PersistStage>,
    listing_limit: usize,
    metrics: Arc<Metrics>,
}

impl ScanPipeline {
    #[must_use]
    pub fn new(
        strategies: HashMap<ScanMode, Arc<dyn ExtractionStrategy>>,
        clean: Arc<dyn CleanStage>,
        persist: Arc<dyn PersistStage>,
        listing_limit: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            strategies,
            clean,
            persist,
            listing_limit,
            metrics,
        }
    }

    /// Run one claimed job end to end.
    ///
    /// # Errors
    /// Any stage failure. The caller turns the error into a failed job; the
    /// pipeline itself never touches job state.
    pub async fn run_scan(&self, job: &ScrapeJob) -> Result<ScanOutcome> {
        let keyword = job.keyword.trim();
        if keyword.is_empty() {
            anyhow::bail!("keyword must not be empty");
        }
        if keyword.len() > MAX_KEYWORD_LEN {
            anyhow::bail!("keyword exceeds {MAX_KEYWORD_LEN} characters");
        }

        let strategy = self
            .strategies
            .get(&job.mode)
            .with_context(|| format!("no extraction strategy for mode {}", job.mode.as_str()))?;

        info!(
            job_id = %job.id,
            %keyword,
            mode = job.mode.as_str(),
            strategy = strategy.name(),
            "starting scan"
        );

        let opts = ExtractOptions {
            mode: job.mode,
            limit: self.listing_limit,
        };
        let outcome = strategy
            .extract(keyword, &opts)
            .await
            .with_context(|| format!("extraction via {} failed", strategy.name()))?;

        self.metrics
            .record_pages_scraped(u64::from(outcome.pages_scraped));

        self.persist
            .backup_raw(job.id, &outcome.listings)
            .await
            .unwrap_or_else(|error| {
                // Archive failures must not fail the scan itself.
                warn!(job_id = %job.id, %error, "raw listing backup failed");
            });

        let cleaned = self
            .clean
            .clean(job.user_id, job.id, &outcome.listings)
            .await
            .context("cleaning stage failed")?;

        let persisted = self.persist.persist(job.id, &cleaned).await?;

        info!(
            job_id = %job.id,
            raw = outcome.listings.len(),
            cleaned = cleaned.len(),
            persisted,
            pages = outcome.pages_scraped,
            source = outcome.source.as_str(),
            "scan finished"
        );

        Ok(ScanOutcome {
            items_found: i32::try_from(persisted).unwrap_or(i32::MAX),
            pages_scraped: i32::try_from(outcome.pages_scraped).unwrap_or(i32::MAX),
            source: outcome.source,
        })
    }
}
