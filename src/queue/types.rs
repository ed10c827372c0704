use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::ScanMode;

/// Lifecycle of a scrape job.
///
/// `Pending -> Running -> Completed | Failed`. Terminal states never
/// transition again; a re-run is always a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScrapeJobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeJobStatus::Pending => "pending",
            ScrapeJobStatus::Running => "running",
            ScrapeJobStatus::Completed => "completed",
            ScrapeJobStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScrapeJobStatus::Pending),
            "running" => Some(ScrapeJobStatus::Running),
            "completed" => Some(ScrapeJobStatus::Completed),
            "failed" => Some(ScrapeJobStatus::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ScrapeJobStatus::Completed | ScrapeJobStatus::Failed)
    }
}

/// A keyword scan queued for processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub keyword: String,
    pub mode: ScanMode,
    pub status: ScrapeJobStatus,
    pub items_found: i32,
    pub pages_scraped: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// New job to insert into the queue.
#[derive(Debug, Clone)]
pub struct NewScrapeJob {
    pub user_id: Uuid,
    pub keyword: String,
    pub mode: ScanMode,
}
