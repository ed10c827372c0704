pub mod store;
pub mod types;
pub mod worker;

pub use store::{JobStore, MemoryJobStore, PgJobStore};
pub use types::{NewScrapeJob, ScrapeJob, ScrapeJobStatus};
pub use worker::{DrainSummary, DrainWorker};
