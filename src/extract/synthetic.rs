//! Synthetic listing generator.
//!
//! Stands in for the official API when no credentials are configured, so the
//! pipeline can be exercised end to end in development environments. Output is
//! seeded from the keyword: the same keyword always yields the same listings.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use xxhash_rust::xxh3::xxh3_64;

use super::{ExtractOptions, ExtractionOutcome, ExtractionStrategy, ListingSource, RawListing, ScanMode};

const MIN_LISTINGS: usize = 12;
const MAX_LISTINGS: usize = 30;

const CONDITIONS: [&str; 4] = ["New", "Pre-Owned", "Open Box", "For Parts"];
const VARIANTS: [&str; 5] = ["Limited Edition", "Vintage", "Rare", "Bundle", "Sealed"];

pub struct SyntheticStrategy;

impl SyntheticStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for SyntheticStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractionStrategy for SyntheticStrategy {
    async fn extract(&self, keyword: &str, opts: &ExtractOptions) -> Result<ExtractionOutcome> {
        let mut rng = StdRng::seed_from_u64(xxh3_64(keyword.as_bytes()));

        let count = rng.random_range(MIN_LISTINGS..=MAX_LISTINGS).min(opts.limit);
        let mut listings = Vec::with_capacity(count);

        for index in 0..count {
            let price = rng.random_range(15.0_f64..450.0).round();
            let shipping_free = rng.random_range(0..100) < 40;
            let shipping = if shipping_free {
                "Free shipping".to_owned()
            } else {
                format!("+${:.2} shipping", rng.random_range(3.0_f64..25.0).round())
            };
            let is_auction = rng.random_range(0..100) < 30;
            let bids_text = if is_auction {
                format!("{} bids", rng.random_range(1..=40))
            } else {
                String::new()
            };

            let condition = CONDITIONS[rng.random_range(0..CONDITIONS.len())];
            let variant = VARIANTS[rng.random_range(0..VARIANTS.len())];

            let sold_date_text = if opts.mode == ScanMode::Sold {
                let days_ago = i64::from(rng.random_range(1..=90_u32));
                let date = Utc::now().date_naive() - ChronoDuration::days(days_ago);
                format!("Sold {}", date.format("%b %-d, %Y"))
            } else {
                String::new()
            };

            listings.push(RawListing {
                keyword: keyword.to_owned(),
                item_url: format!(
                    "https://www.ebay.com/itm/{}",
                    xxh3_64(format!("{keyword}/{index}").as_bytes())
                ),
                title: format!("{keyword} {variant} {condition} #{}", index + 1),
                price_text: format!("${price:.2}"),
                shipping_text: shipping,
                bids_text,
                sold_date_text,
                image_url: None,
                source: ListingSource::Synthetic,
            });
        }

        info!(%keyword, count = listings.len(), "generated synthetic listings");

        Ok(ExtractionOutcome {
            listings,
            pages_scraped: 0,
            source: ListingSource::Synthetic,
        })
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
