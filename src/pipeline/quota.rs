//! Per-user daily scan quota.
//!
//! Enforced at submission time, before a job is ever enqueued. Distinct from
//! the upstream API rate limit, which guards the shared external call budget
//! during extraction.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::queue::JobStore;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { used: i64, limit: i64 },
    Denied { used: i64, limit: i64 },
}

impl QuotaDecision {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }
}

#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check(&self, user_id: Uuid) -> Result<QuotaDecision>;
}

/// Counts jobs the user created since UTC midnight against a fixed limit.
pub struct DailyScanQuota {
    jobs: Arc<dyn JobStore>,
    limit: i64,
}

impl DailyScanQuota {
    #[must_use]
    pub fn new(jobs: Arc<dyn JobStore>, limit: i64) -> Self {
        Self { jobs, limit }
    }
}

#[async_trait]
impl QuotaGate for DailyScanQuota {
    async fn check(&self, user_id: Uuid) -> Result<QuotaDecision> {
        let used = self
            .jobs
            .jobs_created_today(user_id)
            .await
            .context("failed to read daily job count")?;

        if used >= self.limit {
            Ok(QuotaDecision::Denied {
                used,
                limit: self.limit,
            })
        } else {
            Ok(QuotaDecision::Allowed {
                used,
                limit: self.limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ScanMode;
    use crate::queue::{MemoryJobStore, NewScrapeJob};

    #[tokio::test]
    async fn denies_at_limit() {
        let store = Arc::new(MemoryJobStore::new());
        let quota = DailyScanQuota::new(store.clone(), 2);
        let user = Uuid::new_v4();

        assert!(quota.check(user).await.expect("check").is_allowed());

        for _ in 0..2 {
            store
                .enqueue(NewScrapeJob {
                    user_id: user,
                    keyword: "test".into(),
                    mode: ScanMode::Active,
                })
                .await
                .expect("enqueue");
        }

        let decision = quota.check(user).await.expect("check");
        assert_eq!(decision, QuotaDecision::Denied { used: 2, limit: 2 });
    }

    #[tokio::test]
    async fn quota_is_per_user() {
        let store = Arc::new(MemoryJobStore::new());
        let quota = DailyScanQuota::new(store.clone(), 1);
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        store
            .enqueue(NewScrapeJob {
                user_id: user_a,
                keyword: "test".into(),
                mode: ScanMode::Active,
            })
            .await
            .expect("enqueue");

        assert!(!quota.check(user_a).await.expect("check").is_allowed());
        assert!(quota.check(user_b).await.expect("check").is_allowed());
    }
}
