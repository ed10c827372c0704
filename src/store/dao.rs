//! Listing persistence.
//!
//! [`ListingDao`] is the seam between the pipeline and storage. The Postgres
//! implementation backs production; an in-memory one backs tests that have no
//! database available.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::extract::RawListing;

use super::models::CleanListing;

#[async_trait]
pub trait ListingDao: Send + Sync {
    /// Insert cleaned listings for a scan. Re-inserting the same URL for the
    /// same job is a no-op. Returns the number of rows actually inserted.
    async fn insert_listings(&self, listings: &[CleanListing]) -> Result<u64>;

    async fn listings_for_scan(&self, scan_job_id: Uuid) -> Result<Vec<CleanListing>>;

    /// Archive the pre-clean payloads for later debugging of parse failures.
    async fn backup_raw_listings(&self, scan_job_id: Uuid, raw: &[RawListing]) -> Result<()>;

    /// Connectivity probe for readiness checks.
    async fn ping(&self) -> Result<()>;
}

pub struct PgDao {
    pool: PgPool,
}

impl PgDao {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingDao for PgDao {
    async fn insert_listings(&self, listings: &[CleanListing]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open listings transaction")?;

        let mut inserted = 0_u64;
        for listing in listings {
            let result = sqlx::query(
                r"
                INSERT INTO listings
                    (user_id, scan_job_id, keyword, item_url, title, currency,
                     sold_price, shipping_price, is_auction, bid_count,
                     sold_date, image_url, dedup_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (scan_job_id, item_url) DO NOTHING
                ",
            )
            .bind(listing.user_id)
            .bind(listing.scan_job_id)
            .bind(&listing.keyword)
            .bind(&listing.item_url)
            .bind(&listing.title)
            .bind(&listing.currency)
            .bind(listing.sold_price)
            .bind(listing.shipping_price)
            .bind(listing.is_auction)
            .bind(listing.bid_count)
            .bind(listing.sold_date)
            .bind(&listing.image_url)
            .bind(listing.dedup_hash)
            .execute(&mut *tx)
            .await
            .context("failed to insert listing")?;

            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .context("failed to commit listings transaction")?;

        Ok(inserted)
    }

    async fn listings_for_scan(&self, scan_job_id: Uuid) -> Result<Vec<CleanListing>> {
        let listings = sqlx::query_as::<_, CleanListing>(
            r"
            SELECT user_id, scan_job_id, keyword, item_url, title, currency,
                   sold_price, shipping_price, is_auction, bid_count,
                   sold_date, image_url, dedup_hash
            FROM listings
            WHERE scan_job_id = $1
            ORDER BY sold_price DESC NULLS LAST, item_url
            ",
        )
        .bind(scan_job_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to fetch listings for scan")?;

        Ok(listings)
    }

    async fn backup_raw_listings(&self, scan_job_id: Uuid, raw: &[RawListing]) -> Result<()> {
        if raw.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_value(raw).context("failed to serialize raw listings")?;

        sqlx::query(
            r"
            INSERT INTO raw_listing_backups (scan_job_id, payload)
            VALUES ($1, $2)
            ON CONFLICT (scan_job_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                created_at = NOW()
            ",
        )
        .bind(scan_job_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("failed to back up raw listings")?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let row = sqlx::query(r"SELECT 1 AS ok")
            .fetch_one(&self.pool)
            .await
            .context("database ping failed")?;
        let _: i32 = row.try_get("ok")?;
        Ok(())
    }
}

/// In-memory DAO for tests.
#[derive(Default)]
pub struct MemoryDao {
    listings: Mutex<Vec<CleanListing>>,
    raw_backups: Mutex<HashMap<Uuid, Vec<RawListing>>>,
}

impl MemoryDao {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raw_backup_for(&self, scan_job_id: Uuid) -> Option<Vec<RawListing>> {
        self.raw_backups.lock().await.get(&scan_job_id).cloned()
    }
}

#[async_trait]
impl ListingDao for MemoryDao {
    async fn insert_listings(&self, listings: &[CleanListing]) -> Result<u64> {
        let mut stored = self.listings.lock().await;
        let mut inserted = 0_u64;
        for listing in listings {
            let exists = stored
                .iter()
                .any(|l| l.scan_job_id == listing.scan_job_id && l.item_url == listing.item_url);
            if !exists {
                stored.push(listing.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn listings_for_scan(&self, scan_job_id: Uuid) -> Result<Vec<CleanListing>> {
        let stored = self.listings.lock().await;
        Ok(stored
            .iter()
            .filter(|l| l.scan_job_id == scan_job_id)
            .cloned()
            .collect())
    }

    async fn backup_raw_listings(&self, scan_job_id: Uuid, raw: &[RawListing]) -> Result<()> {
        self.raw_backups
            .lock()
            .await
            .insert(scan_job_id, raw.to_vec());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
