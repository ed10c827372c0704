//! Extraction strategies: interchangeable implementations of "get listings
//! for a keyword". All strategies produce the same [`RawListing`] shape, so
//! the pipeline cannot tell them apart except through the explicit source tag.

pub mod api;
pub mod dom;
pub mod shapes;
pub mod synthetic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use api::ApiStrategy;
pub use dom::DomStrategy;
pub use synthetic::SyntheticStrategy;

/// Which listing population a scan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Active,
    Sold,
}

impl ScanMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScanMode::Active => "active",
            ScanMode::Sold => "sold",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ScanMode::Active),
            "sold" => Some(ScanMode::Sold),
            _ => None,
        }
    }
}

/// Where a raw listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    Api,
    Dom,
    Synthetic,
}

impl ListingSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ListingSource::Api => "api",
            ListingSource::Dom => "dom",
            ListingSource::Synthetic => "synthetic",
        }
    }
}

/// One scraped item before normalization. Text fields are unparsed; the
/// cleaner owns all numeric and date interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub keyword: String,
    pub item_url: String,
    pub title: String,
    pub price_text: String,
    pub shipping_text: String,
    pub bids_text: String,
    pub sold_date_text: String,
    pub image_url: Option<String>,
    pub source: ListingSource,
}

/// Caller-supplied bounds for one extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub mode: ScanMode,
    pub limit: usize,
}

/// What a strategy produced for one keyword.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub listings: Vec<RawListing>,
    pub pages_scraped: u32,
    pub source: ListingSource,
}

/// Interchangeable "get listings for a keyword" implementation.
///
/// A strategy-level failure (network down, browser launch failure) is an
/// `Err` and must surface as a job failure, never an empty `Ok`, so
/// operators can distinguish "no listings exist" from "extraction broke".
/// "No results" is a successful empty outcome.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    async fn extract(&self, keyword: &str, opts: &ExtractOptions) -> anyhow::Result<ExtractionOutcome>;

    fn name(&self) -> &'static str;
}
