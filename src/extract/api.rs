//! Official-API extraction strategy.
//!
//! Every outbound call is gated by the daily rate limiter and wrapped by the
//! retry executor. A short-TTL in-memory cache absorbs repeated queries for
//! the same keyword within the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clients::browse_api::{ApiItemSummary, BrowseApiClient};
use crate::observability::metrics::Metrics;
use crate::ratelimit::{RateLimitError, RateLimiter};
use crate::util::error::is_retryable;
use crate::util::retry::{RetryPolicy, retry_with};

use super::{ExtractOptions, ExtractionOutcome, ExtractionStrategy, ListingSource, RawListing, ScanMode};

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    listings: Vec<RawListing>,
}

type CacheKey = (ScanMode, String, usize);

pub struct ApiStrategy {
    client: Arc<BrowseApiClient>,
    limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    cache_ttl: std::time::Duration,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    metrics: Arc<Metrics>,
}

impl ApiStrategy {
    #[must_use]
    pub fn new(
        client: Arc<BrowseApiClient>,
        limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        cache_ttl: std::time::Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            limiter,
            retry_policy,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    async fn cached(&self, key: &CacheKey) -> Option<Vec<RawListing>> {
        let cache = self.cache.lock().await;
        cache
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.listings.clone())
    }

    async fn store(&self, key: CacheKey, listings: Vec<RawListing>) {
        let mut cache = self.cache.lock().await;
        cache.retain(|_, entry| entry.fetched_at.elapsed() < self.cache_ttl);
        cache.insert(
            key,
            CacheEntry {
                fetched_at: Instant::now(),
                listings,
            },
        );
    }
}

#[async_trait]
impl ExtractionStrategy for ApiStrategy {
    async fn extract(&self, keyword: &str, opts: &ExtractOptions) -> Result<ExtractionOutcome> {
        let key: CacheKey = (opts.mode, keyword.to_string(), opts.limit);

        if let Some(listings) = self.cached(&key).await {
            debug!(%keyword, mode = opts.mode.as_str(), "serving listings from cache");
            return Ok(ExtractionOutcome {
                listings,
                pages_scraped: 0,
                source: ListingSource::Api,
            });
        }

        // Fail fast before touching the network when the budget is gone.
        let status = self.limiter.check().await?;
        if status.blocked {
            return Err(RateLimitError::Exceeded {
                service: self.limiter.service().to_string(),
                current: status.current,
                limit: status.limit,
            }
            .into());
        }

        let attempts = AtomicUsize::new(0);
        let attempts = &attempts;
        let items = retry_with(&self.retry_policy, is_retryable, || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                self.metrics.record_retry_attempt();
            }
            // Every network attempt consumes budget, retries included.
            self.limiter.record_call().await?;
            self.client.search(keyword, opts.mode, opts.limit).await
        })
        .await
        .context("browse API search failed after retries")?;

        let listings: Vec<RawListing> = items
            .into_iter()
            .filter_map(|item| convert_item(keyword, opts.mode, item))
            .collect();

        info!(
            %keyword,
            mode = opts.mode.as_str(),
            count = listings.len(),
            "fetched listings from browse API"
        );

        self.store(key, listings.clone()).await;

        Ok(ExtractionOutcome {
            listings,
            pages_scraped: 1,
            source: ListingSource::Api,
        })
    }

    fn name(&self) -> &'static str {
        "browse_api"
    }
}

/// Translate API field paths into the common raw shape. Items without a web
/// URL cannot be deduplicated and are skipped.
fn convert_item(keyword: &str, mode: ScanMode, item: ApiItemSummary) -> Option<RawListing> {
    let item_url = item.item_web_url?;
    let sold_date_text = if mode == ScanMode::Sold {
        item.item_end_date.unwrap_or_default()
    } else {
        String::new()
    };

    Some(RawListing {
        keyword: keyword.to_string(),
        item_url,
        title: item.title.unwrap_or_default(),
        price_text: item.price.map(|p| p.value).unwrap_or_default(),
        shipping_text: item
            .shipping_options
            .first()
            .and_then(|o| o.shipping_cost.as_ref())
            .map(|c| c.value.clone())
            .unwrap_or_default(),
        bids_text: item
            .bid_count
            .map(|n| format!("{n} bids"))
            .unwrap_or_default(),
        sold_date_text,
        image_url: item.image.map(|i| i.image_url),
        source: ListingSource::Api,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::clients::browse_api::BrowseApiConfig;
    use crate::ratelimit::{CounterStore, MemoryCounterStore};

    use super::*;

    fn strategy(
        base_url: String,
        store: Arc<dyn CounterStore>,
        limit: i64,
        max_retries: usize,
    ) -> ApiStrategy {
        let client = Arc::new(
            BrowseApiClient::new(BrowseApiConfig {
                base_url,
                token: None,
                connect_timeout: Duration::from_secs(1),
                total_timeout: Duration::from_secs(2),
            })
            .expect("client builds"),
        );
        let metrics = Metrics::for_tests();
        let limiter = Arc::new(RateLimiter::new(
            store,
            "browse_api",
            limit,
            Arc::clone(&metrics),
        ));
        ApiStrategy::new(
            client,
            limiter,
            RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2)),
            Duration::from_secs(900),
            metrics,
        )
    }

    fn search_body() -> serde_json::Value {
        serde_json::json!({
            "itemSummaries": [{
                "title": "Film camera",
                "itemWebUrl": "https://example.com/itm/9",
                "price": {"value": "45.00", "currency": "USD"},
                "shippingOptions": [],
            }]
        })
    }

    #[tokio::test]
    async fn repeated_queries_within_ttl_hit_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/buy/browse/v1/item_summary/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCounterStore::new());
        let strategy = strategy(server.uri(), store, 100, 0);
        let opts = ExtractOptions {
            mode: ScanMode::Active,
            limit: 60,
        };

        let first = strategy.extract("film camera", &opts).await.expect("first");
        let second = strategy
            .extract("film camera", &opts)
            .await
            .expect("second");

        assert_eq!(first.listings, second.listings);
        assert_eq!(second.pages_scraped, 0);
    }

    #[tokio::test]
    async fn blocked_budget_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/buy/browse/v1/item_summary/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
            .expect(0)
            .mount(&server)
            .await;

        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        // Exhaust the budget up front.
        let today = chrono::Utc::now().date_naive();
        for _ in 0..5 {
            store
                .increment("browse_api", today, 5)
                .await
                .expect("seed counter");
        }

        let strategy = strategy(server.uri(), store, 5, 0);
        let opts = ExtractOptions {
            mode: ScanMode::Active,
            limit: 60,
        };

        let err = strategy
            .extract("film camera", &opts)
            .await
            .expect_err("budget exhausted");
        assert!(err.downcast_ref::<RateLimitError>().is_some());
    }

    #[tokio::test]
    async fn server_errors_are_retried_and_every_attempt_is_charged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/buy/browse/v1/item_summary/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .expect(3)
            .mount(&server)
            .await;

        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let strategy = strategy(server.uri(), Arc::clone(&store), 100, 2);
        let opts = ExtractOptions {
            mode: ScanMode::Active,
            limit: 60,
        };

        let err = strategy
            .extract("film camera", &opts)
            .await
            .expect_err("server keeps failing");
        assert!(
            err.chain().any(|cause| cause.to_string().contains("500")),
            "unexpected error: {err:#}"
        );

        let today = chrono::Utc::now().date_naive();
        let (current, _) = store
            .read("browse_api", today)
            .await
            .expect("counter read")
            .expect("counter row");
        assert_eq!(current, 3);
    }

    #[test]
    fn items_without_url_are_skipped() {
        let item = ApiItemSummary {
            title: Some("No link".into()),
            item_web_url: None,
            price: None,
            shipping_options: vec![],
            bid_count: None,
            item_end_date: None,
            image: None,
        };
        assert!(convert_item("camera", ScanMode::Active, item).is_none());
    }
}
