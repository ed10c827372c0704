//! Cleaning stage: raw text fields to typed listings.
//!
//! Every numeric and date interpretation lives here. Parse failures degrade
//! per field (missing price stays `None`, unparseable shipping becomes 0.0,
//! an unreadable sold caption falls back to the current date) rather than
//! dropping the listing; only listings without a URL or title are discarded.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::extract::RawListing;
use crate::store::CleanListing;

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)").expect("compile price pattern"));
static BIDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+)\s*bid").expect("compile bids pattern"));

/// Extract the first numeric amount from a price string. Dollar signs and
/// thousands separators are stripped before matching, so both "$1,234.56"
/// display text and bare API decimals like "149.99" parse.
///
/// Range prices like "$12.00 to $45.00" resolve to the lower bound. Returns
/// `None` for text with no amount at all.
#[must_use]
pub fn parse_price(text: &str) -> Option<f64> {
    let stripped = text.replace(['$', ','], "");
    let captures = PRICE_RE.captures(&stripped)?;
    captures.get(1)?.as_str().parse::<f64>().ok()
}

/// Normalize shipping text to a cost. Free shipping and anything unparseable
/// are both 0.0.
#[must_use]
pub fn parse_shipping(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    if lowered.contains("free") {
        return 0.0;
    }
    parse_price(text).unwrap_or(0.0)
}

/// Extract a bid count from text like "3 bids" or "1 bid". Zero when absent.
#[must_use]
pub fn parse_bid_count(text: &str) -> i32 {
    BIDS_RE
        .captures(&text.to_lowercase())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .unwrap_or(0)
}

/// A listing is an auction when its bid text mentions bids at all, even
/// "0 bids" (an auction nobody has bid on yet).
#[must_use]
pub fn detect_auction(bids_text: &str) -> bool {
    bids_text.to_lowercase().contains("bid")
}

/// Parse sold-date captions like "Sold Oct 12, 2024" or bare "Oct 12, 2024".
#[must_use]
pub fn parse_sold_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text
        .trim()
        .trim_start_matches("Sold")
        .trim_start_matches("Item sold")
        .trim()
        .trim_start_matches("on ");
    NaiveDate::parse_from_str(trimmed.trim(), "%b %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed.trim(), "%B %d, %Y"))
        .ok()
}

/// Content hash for duplicate detection across scans: same title, price and
/// sold date means the same listing however it was reached.
#[must_use]
pub fn dedup_hash(title: &str, sold_price: Option<f64>, sold_date: Option<NaiveDate>) -> i64 {
    let price_part = sold_price.map_or_else(String::new, |p| format!("{p:.2}"));
    let date_part = sold_date.map_or_else(String::new, |d| d.to_string());
    let key = format!("{}|{price_part}|{date_part}", title.trim().to_lowercase());
    // Postgres BIGINT is signed; keep the raw bit pattern.
    xxh3_64(key.as_bytes()) as i64
}

/// Normalizes raw listings into [`CleanListing`] rows.
#[async_trait]
pub trait CleanStage: Send + Sync {
    async fn clean(
        &self,
        user_id: Uuid,
        scan_job_id: Uuid,
        raw: &[RawListing],
    ) -> anyhow::Result<Vec<CleanListing>>;
}

pub struct ListingCleanStage;

impl ListingCleanStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn clean_one(user_id: Uuid, scan_job_id: Uuid, raw: &RawListing) -> Option<CleanListing> {
        let title = raw.title.trim();
        if title.is_empty() || raw.item_url.trim().is_empty() {
            return None;
        }

        let sold_price = parse_price(&raw.price_text);
        // A sold caption we cannot parse still marks a completed sale; date it
        // today rather than losing it.
        let sold_date = parse_sold_date(&raw.sold_date_text).or_else(|| {
            (!raw.sold_date_text.trim().is_empty()).then(|| Utc::now().date_naive())
        });

        Some(CleanListing {
            user_id,
            scan_job_id,
            keyword: raw.keyword.clone(),
            item_url: raw.item_url.trim().to_owned(),
            title: title.to_owned(),
            currency: "USD".to_owned(),
            sold_price,
            shipping_price: parse_shipping(&raw.shipping_text),
            is_auction: detect_auction(&raw.bids_text),
            bid_count: parse_bid_count(&raw.bids_text),
            sold_date,
            image_url: raw.image_url.clone(),
            dedup_hash: dedup_hash(title, sold_price, sold_date),
        })
    }
}

impl Default for ListingCleanStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CleanStage for ListingCleanStage {
    async fn clean(
        &self,
        user_id: Uuid,
        scan_job_id: Uuid,
        raw: &[RawListing],
    ) -> anyhow::Result<Vec<CleanListing>> {
        let mut seen_urls = HashSet::new();
        let mut cleaned = Vec::with_capacity(raw.len());
        let mut dropped = 0_usize;

        for raw_listing in raw {
            let Some(listing) = Self::clean_one(user_id, scan_job_id, raw_listing) else {
                dropped += 1;
                continue;
            };
            // First occurrence of a URL wins; later duplicates are discarded.
            if seen_urls.insert(listing.item_url.clone()) {
                cleaned.push(listing);
            }
        }

        if dropped > 0 {
            debug!(dropped, "dropped listings without title or URL");
        }

        Ok(cleaned)
    }
}
