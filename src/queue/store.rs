//! Scrape job queue persistence.
//!
//! Claiming uses conditional UPDATEs so that two workers can never run the
//! same job: a claim only succeeds while the row is still 'pending', and
//! batch claims take row locks with SKIP LOCKED.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::extract::ScanMode;

use super::types::{NewScrapeJob, ScrapeJob, ScrapeJobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: NewScrapeJob) -> Result<ScrapeJob>;

    /// Atomically move a batch of pending jobs to 'running', oldest first.
    async fn claim_pending_batch(&self, limit: usize) -> Result<Vec<ScrapeJob>>;

    async fn mark_completed(&self, job_id: Uuid, items_found: i32, pages_scraped: i32)
    -> Result<()>;

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Fail 'running' jobs whose claim is older than the cutoff. Returns how
    /// many jobs were failed. Recovers jobs orphaned by a worker crash.
    async fn fail_stale_running(&self, older_than: Duration) -> Result<u64>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ScrapeJob>>;

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<ScrapeJob>>;

    /// How many jobs this user created since UTC midnight. Drives the daily
    /// scan quota.
    async fn jobs_created_today(&self, user_id: Uuid) -> Result<i64>;
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<ScrapeJob> {
        let mode_str: String = row.try_get("mode").context("failed to get mode")?;
        let mode = ScanMode::from_str(&mode_str)
            .with_context(|| format!("invalid scan mode: {mode_str}"))?;

        let status_str: String = row.try_get("status").context("failed to get status")?;
        let status = ScrapeJobStatus::from_str(&status_str)
            .with_context(|| format!("invalid job status: {status_str}"))?;

        Ok(ScrapeJob {
            id: row.try_get("id").context("failed to get id")?,
            user_id: row.try_get("user_id").context("failed to get user_id")?,
            keyword: row.try_get("keyword").context("failed to get keyword")?,
            mode,
            status,
            items_found: row.try_get("items_found").unwrap_or(0),
            pages_scraped: row.try_get("pages_scraped").unwrap_or(0),
            error_message: row.try_get("error_message").ok(),
            created_at: row.try_get("created_at").context("failed to get created_at")?,
            started_at: row.try_get("started_at").ok(),
            completed_at: row.try_get("completed_at").ok(),
        })
    }
}

const JOB_COLUMNS: &str = "id, user_id, keyword, mode, status, items_found, pages_scraped, \
                           error_message, created_at, started_at, completed_at";

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewScrapeJob) -> Result<ScrapeJob> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO scrape_jobs (id, user_id, keyword, mode, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(job.user_id)
        .bind(&job.keyword)
        .bind(job.mode.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to enqueue scrape job")?;

        Self::row_to_job(&row)
    }

    async fn claim_pending_batch(&self, limit: usize) -> Result<Vec<ScrapeJob>> {
        let rows = sqlx::query(&format!(
            r"
            UPDATE scrape_jobs
            SET status = 'running',
                started_at = NOW()
            WHERE id IN (
                SELECT id FROM scrape_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to claim pending jobs")?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(Self::row_to_job(row)?);
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        items_found: i32,
        pages_scraped: i32,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE scrape_jobs
            SET status = 'completed',
                items_found = $2,
                pages_scraped = $3,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            ",
        )
        .bind(job_id)
        .bind(items_found)
        .bind(pages_scraped)
        .execute(&self.pool)
        .await
        .context("failed to mark job as completed")?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE scrape_jobs
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            ",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to mark job as failed")?;

        Ok(())
    }

    async fn fail_stale_running(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE scrape_jobs
            SET status = 'failed',
                error_message = 'worker lost: job exceeded the running deadline',
                completed_at = NOW()
            WHERE status = 'running'
              AND started_at < NOW() - make_interval(secs => $1)
            ",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("failed to fail stale running jobs")?;

        Ok(result.rows_affected())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScrapeJob>> {
        let row = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM scrape_jobs
            WHERE id = $1
            "
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get scrape job")?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<ScrapeJob>> {
        let row = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM scrape_jobs
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to get latest job for user")?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn jobs_created_today(&self, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS job_count
            FROM scrape_jobs
            WHERE user_id = $1
              AND created_at >= date_trunc('day', NOW() AT TIME ZONE 'utc') AT TIME ZONE 'utc'
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count jobs created today")?;

        Ok(row.try_get("job_count").unwrap_or(0))
    }
}

/// In-memory job store for tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ScrapeJob>>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewScrapeJob) -> Result<ScrapeJob> {
        let scrape_job = ScrapeJob {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            keyword: job.keyword,
            mode: job.mode,
            status: ScrapeJobStatus::Pending,
            items_found: 0,
            pages_scraped: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.jobs
            .lock()
            .await
            .insert(scrape_job.id, scrape_job.clone());
        Ok(scrape_job)
    }

    async fn claim_pending_batch(&self, limit: usize) -> Result<Vec<ScrapeJob>> {
        let mut jobs = self.jobs.lock().await;
        let mut pending: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.status == ScrapeJobStatus::Pending)
            .map(|j| j.id)
            .collect();
        pending.sort_by_key(|id| jobs[id].created_at);
        pending.truncate(limit);

        let mut claimed = Vec::with_capacity(pending.len());
        for id in pending {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = ScrapeJobStatus::Running;
                job.started_at = Some(Utc::now());
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        items_found: i32,
        pages_scraped: i32,
    ) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(&job_id)
            && job.status == ScrapeJobStatus::Running
        {
            job.status = ScrapeJobStatus::Completed;
            job.items_found = items_found;
            job.pages_scraped = pages_scraped;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(&job_id)
            && job.status == ScrapeJobStatus::Running
        {
            job.status = ScrapeJobStatus::Failed;
            job.error_message = Some(error.to_owned());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_stale_running(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let mut failed = 0_u64;
        for job in self.jobs.lock().await.values_mut() {
            if job.status == ScrapeJobStatus::Running
                && job.started_at.is_some_and(|t| t < cutoff)
            {
                job.status = ScrapeJobStatus::Failed;
                job.error_message = Some("worker lost: job exceeded the running deadline".into());
                job.completed_at = Some(Utc::now());
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScrapeJob>> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<ScrapeJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.user_id == user_id)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn jobs_created_today(&self, user_id: Uuid) -> Result<i64> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc());
        let Some(midnight) = midnight else {
            return Ok(0);
        };
        let count = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.user_id == user_id && j.created_at >= midnight)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}
