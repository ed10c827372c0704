//! Persistence stage: write cleaned listings through the listing DAO.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::extract::RawListing;
use crate::observability::metrics::Metrics;
use crate::store::{CleanListing, ListingDao};

#[async_trait]
pub trait PersistStage: Send + Sync {
    /// Returns the number of listings actually written.
    async fn persist(&self, scan_job_id: Uuid, listings: &[CleanListing]) -> Result<u64>;

    /// Optional raw-payload archive for parse debugging.
    async fn backup_raw(&self, scan_job_id: Uuid, raw: &[RawListing]) -> Result<()>;
}

pub struct DaoPersistStage {
    dao: Arc<dyn ListingDao>,
    retain_raw: bool,
    metrics: Arc<Metrics>,
}

impl DaoPersistStage {
    #[must_use]
    pub fn new(dao: Arc<dyn ListingDao>, retain_raw: bool, metrics: Arc<Metrics>) -> Self {
        Self {
            dao,
            retain_raw,
            metrics,
        }
    }
}

#[async_trait]
impl PersistStage for DaoPersistStage {
    async fn persist(&self, scan_job_id: Uuid, listings: &[CleanListing]) -> Result<u64> {
        if listings.is_empty() {
            return Ok(0);
        }

        let inserted = self
            .dao
            .insert_listings(listings)
            .await
            .context("failed to persist cleaned listings")?;

        self.metrics.record_listings_persisted(inserted);
        info!(%scan_job_id, inserted, total = listings.len(), "persisted listings");
        Ok(inserted)
    }

    async fn backup_raw(&self, scan_job_id: Uuid, raw: &[RawListing]) -> Result<()> {
        if !self.retain_raw || raw.is_empty() {
            return Ok(());
        }
        self.dao
            .backup_raw_listings(scan_job_id, raw)
            .await
            .context("failed to archive raw listings")
    }
}
