use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully cleaned listing, ready to persist.
///
/// All text fields from extraction have been normalized: prices and shipping
/// are numeric, auction detection is resolved, and `dedup_hash` identifies
/// content duplicates across scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CleanListing {
    pub user_id: Uuid,
    pub scan_job_id: Uuid,
    pub keyword: String,
    pub item_url: String,
    pub title: String,
    pub currency: String,
    /// None when the listing carried no parseable price.
    pub sold_price: Option<f64>,
    /// Zero for free shipping or unparseable shipping text.
    pub shipping_price: f64,
    pub is_auction: bool,
    pub bid_count: i32,
    pub sold_date: Option<NaiveDate>,
    pub image_url: Option<String>,
    /// xxh3 over the normalized (title, price, sold_date) triple.
    pub dedup_hash: i64,
}
