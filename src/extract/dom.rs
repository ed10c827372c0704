//! DOM-scraping extraction strategy.
//!
//! Renders search result pages with a headless Chromium subprocess and parses
//! the returned DOM against the shape list in [`super::shapes`]. Each render
//! carries a hard timeout and a throwaway profile directory; the child process
//! is killed when the handle drops, so teardown happens on every exit path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::util::retry::{RetryPolicy, retry_with};

use super::{ExtractOptions, ExtractionOutcome, ExtractionStrategy, ListingSource, ScanMode, shapes};

/// Realistic desktop fingerprint. Default headless values are an instant
/// bot-detection giveaway.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const WINDOW_SIZE: &str = "1366,768";
const ACCEPT_LANG: &str = "en-US";

/// Max retry attempts for transient render failures (fork pressure, timeouts).
const RENDER_MAX_RETRIES: usize = 2;
const RENDER_RETRY_INITIAL: Duration = Duration::from_secs(3);
const RENDER_RETRY_CAP: Duration = Duration::from_secs(9);

/// Renders a URL to its DOM via `chromium --headless --dump-dom`.
pub struct ChromeRenderer {
    chrome_bin: String,
    semaphore: Semaphore,
    timeout: Duration,
}

impl ChromeRenderer {
    #[must_use]
    pub fn new(chrome_bin: impl Into<String>, max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            chrome_bin: chrome_bin.into(),
            semaphore: Semaphore::new(max_concurrency.max(1)),
            timeout,
        }
    }

    /// Render one page and return its serialized DOM.
    ///
    /// # Errors
    /// Invalid URL scheme, launch failure, non-zero exit, or timeout.
    pub async fn render(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).context("invalid page URL")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("only http/https URLs are allowed, got: {}", parsed.scheme());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("renderer semaphore closed")?;

        // Fresh profile per render; the tempdir cleans itself up.
        let profile_dir = tempfile::tempdir().context("failed to create chrome profile dir")?;

        let mut command = tokio::process::Command::new(&self.chrome_bin);
        command
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                &format!("--user-agent={USER_AGENT}"),
                &format!("--window-size={WINDOW_SIZE}"),
                &format!("--lang={ACCEPT_LANG}"),
                &format!("--user-data-dir={}", profile_dir.path().display()),
                "--dump-dom",
                url,
            ])
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow::anyhow!("chromium render timed out after {:?}", self.timeout))?
            .context("failed to launch chromium")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "chromium exited with {}: {}",
                output.status,
                stderr.trim().chars().take(300).collect::<String>()
            );
        }

        if let Err(error) = profile_dir.close() {
            // Leftover profile dirs are disk noise, not a job failure.
            warn!(%error, "failed to remove chrome profile dir");
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct DomStrategy {
    renderer: Arc<ChromeRenderer>,
    search_base_url: String,
    max_pages: u32,
    page_delay: Duration,
}

impl DomStrategy {
    #[must_use]
    pub fn new(
        renderer: Arc<ChromeRenderer>,
        search_base_url: impl Into<String>,
        max_pages: u32,
        page_delay: Duration,
    ) -> Self {
        Self {
            renderer,
            search_base_url: search_base_url.into(),
            max_pages: max_pages.max(1),
            page_delay,
        }
    }

    fn search_url(&self, keyword: &str, mode: ScanMode, page: u32) -> Result<String> {
        let mut url = Url::parse(&self.search_base_url)
            .context("invalid search base URL")?
            .join("/sch/i.html")
            .context("failed to build search URL")?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("_nkw", keyword);
            query_pairs.append_pair("_pgn", &page.to_string());
            if mode == ScanMode::Sold {
                query_pairs.append_pair("LH_Sold", "1");
                query_pairs.append_pair("LH_Complete", "1");
            }
        }

        Ok(url.into())
    }
}

#[async_trait]
impl ExtractionStrategy for DomStrategy {
    async fn extract(&self, keyword: &str, opts: &ExtractOptions) -> Result<ExtractionOutcome> {
        let retry_policy = RetryPolicy::new(RENDER_MAX_RETRIES, RENDER_RETRY_INITIAL, RENDER_RETRY_CAP);
        let mut listings = Vec::new();
        let mut pages_scraped = 0_u32;

        for page in 1..=self.max_pages {
            let url = self.search_url(keyword, opts.mode, page)?;

            let html = retry_with(&retry_policy, |_| true, || self.renderer.render(&url))
                .await
                .with_context(|| format!("failed to render search page {page}"))?;
            pages_scraped += 1;

            let page_listings = shapes::parse_search_page(&html, keyword);
            if page_listings.is_empty() {
                // Valid "no results" page, or a shape we do not know yet.
                warn!(%keyword, page, "no listing shape matched on page");
                break;
            }

            listings.extend(page_listings);
            if listings.len() >= opts.limit {
                listings.truncate(opts.limit);
                break;
            }

            if page < self.max_pages {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        info!(
            %keyword,
            mode = opts.mode.as_str(),
            pages_scraped,
            count = listings.len(),
            "scraped listings from search pages"
        );

        Ok(ExtractionOutcome {
            listings,
            pages_scraped,
            source: ListingSource::Dom,
        })
    }

    fn name(&self) -> &'static str {
        "dom_scrape"
    }
}
