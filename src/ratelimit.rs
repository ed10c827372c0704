//! Daily call-budget tracking for external services.
//!
//! One counter row per (service name, UTC calendar day). The counter is the
//! only cross-request shared mutable state in the worker, so it is mutated
//! exclusively through a single atomic upsert-increment; callers never
//! read-modify-write it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::observability::metrics::Metrics;

/// Fraction of the daily limit at which a warning is emitted.
const WARN_THRESHOLD: f64 = 0.8;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("daily call budget exhausted for {service}: {current}/{limit}")]
    Exceeded {
        service: String,
        current: i64,
        limit: i64,
    },
}

/// Snapshot of today's budget for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RateLimitStatus {
    pub current: i64,
    pub limit: i64,
    pub remaining: i64,
    pub blocked: bool,
}

/// Storage backend for daily counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read today's (count, limit) for a service, `None` if no calls yet.
    async fn read(&self, service: &str, day: NaiveDate) -> Result<Option<(i64, i64)>>;

    /// Atomically increment today's counter by one and return the new
    /// (count, limit). Creates the row with the given limit on first call
    /// of the day.
    async fn increment(&self, service: &str, day: NaiveDate, default_limit: i64)
    -> Result<(i64, i64)>;
}

/// Postgres-backed counter store.
#[derive(Debug, Clone)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn read(&self, service: &str, day: NaiveDate) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query(
            r"
            SELECT call_count, daily_limit
            FROM rate_limit_counters
            WHERE service_name = $1 AND day = $2
            ",
        )
        .bind(service)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read rate limit counter")?;

        match row {
            Some(row) => {
                let count: i64 = row.try_get("call_count").context("failed to get call_count")?;
                let limit: i64 = row
                    .try_get("daily_limit")
                    .context("failed to get daily_limit")?;
                Ok(Some((count, limit)))
            }
            None => Ok(None),
        }
    }

    async fn increment(
        &self,
        service: &str,
        day: NaiveDate,
        default_limit: i64,
    ) -> Result<(i64, i64)> {
        // Single atomic upsert-increment. Concurrent callers serialize on the
        // row; no increments are lost.
        let row = sqlx::query(
            r"
            INSERT INTO rate_limit_counters (service_name, day, call_count, daily_limit)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (service_name, day)
            DO UPDATE SET call_count = rate_limit_counters.call_count + 1
            RETURNING call_count, daily_limit
            ",
        )
        .bind(service)
        .bind(day)
        .bind(default_limit)
        .fetch_one(&self.pool)
        .await
        .context("failed to increment rate limit counter")?;

        let count: i64 = row.try_get("call_count").context("failed to get call_count")?;
        let limit: i64 = row
            .try_get("daily_limit")
            .context("failed to get daily_limit")?;
        Ok((count, limit))
    }
}

/// In-memory counter store for tests and offline operation.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<(String, NaiveDate), (i64, i64)>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn read(&self, service: &str, day: NaiveDate) -> Result<Option<(i64, i64)>> {
        let counters = self.counters.lock().await;
        Ok(counters.get(&(service.to_string(), day)).copied())
    }

    async fn increment(
        &self,
        service: &str,
        day: NaiveDate,
        default_limit: i64,
    ) -> Result<(i64, i64)> {
        let mut counters = self.counters.lock().await;
        let entry = counters
            .entry((service.to_string(), day))
            .or_insert((0, default_limit));
        entry.0 += 1;
        Ok(*entry)
    }
}

/// Daily budget tracker for one named service.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    service: String,
    daily_limit: i64,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        store: Arc<dyn CounterStore>,
        service: impl Into<String>,
        daily_limit: i64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            service: service.into(),
            daily_limit,
            metrics,
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Report today's budget state without consuming any of it.
    ///
    /// # Errors
    /// Returns an error when the counter store is unreachable.
    pub async fn check(&self) -> Result<RateLimitStatus> {
        let today = Utc::now().date_naive();
        let (current, limit) = self
            .store
            .read(&self.service, today)
            .await?
            .unwrap_or((0, self.daily_limit));

        Ok(Self::status_for(current, limit))
    }

    /// Consume one call from today's budget.
    ///
    /// Crossing 80% of the limit emits a warning without blocking. Returns
    /// [`RateLimitError::Exceeded`] once the budget is already exhausted, so
    /// gated callers fail fast instead of attempting the outbound call.
    ///
    /// # Errors
    /// Counter store failures, or [`RateLimitError::Exceeded`].
    pub async fn record_call(&self) -> Result<RateLimitStatus> {
        let today = Utc::now().date_naive();
        let (current, limit) = self
            .store
            .increment(&self.service, today, self.daily_limit)
            .await?;

        let status = Self::status_for(current, limit);
        if status.blocked && current > limit {
            self.metrics.record_rate_limit_blocked(&self.service);
            return Err(RateLimitError::Exceeded {
                service: self.service.clone(),
                current,
                limit,
            }
            .into());
        }

        #[allow(clippy::cast_precision_loss)]
        if (current as f64) >= (limit as f64) * WARN_THRESHOLD {
            self.metrics.record_rate_limit_warning(&self.service);
            warn!(
                service = %self.service,
                current,
                limit,
                "daily call budget above warning threshold"
            );
        } else {
            debug!(service = %self.service, current, limit, "recorded external call");
        }

        Ok(status)
    }

    fn status_for(current: i64, limit: i64) -> RateLimitStatus {
        RateLimitStatus {
            current,
            limit,
            remaining: (limit - current).max(0),
            blocked: current >= limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;

    fn limiter(store: Arc<dyn CounterStore>, limit: i64) -> RateLimiter {
        RateLimiter::new(store, "browse_api", limit, Metrics::for_tests())
    }

    #[tokio::test]
    async fn fresh_counter_reports_zero_state() {
        let limiter = limiter(Arc::new(MemoryCounterStore::new()), 5);

        let status = limiter.check().await.expect("check succeeds");

        assert_eq!(status.current, 0);
        assert_eq!(status.limit, 5);
        assert_eq!(status.remaining, 5);
        assert!(!status.blocked);
    }

    #[tokio::test]
    async fn concurrent_increments_lose_no_updates() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = Arc::new(limiter(store, 1000));

        let calls = (0..64).map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.record_call().await })
        });
        for result in join_all(calls).await {
            result.expect("task completes").expect("call recorded");
        }

        let status = limiter.check().await.expect("check succeeds");
        assert_eq!(status.current, 64);
    }

    #[tokio::test]
    async fn exhausted_budget_blocks() {
        let limiter = limiter(Arc::new(MemoryCounterStore::new()), 5);

        for _ in 0..5 {
            limiter.record_call().await.expect("within budget");
        }

        let status = limiter.check().await.expect("check succeeds");
        assert!(status.blocked);
        assert_eq!(status.remaining, 0);

        let err = limiter.record_call().await.expect_err("over budget");
        assert!(err.downcast_ref::<RateLimitError>().is_some());
    }

    #[tokio::test]
    async fn budgets_are_independent_per_service() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let browse = RateLimiter::new(Arc::clone(&store), "browse_api", 5, Metrics::for_tests());
        let search = RateLimiter::new(Arc::clone(&store), "search_page", 5, Metrics::for_tests());

        browse.record_call().await.expect("recorded");

        assert_eq!(browse.check().await.expect("check").current, 1);
        assert_eq!(search.check().await.expect("check").current, 0);
    }
}
