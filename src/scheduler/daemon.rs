//! Background drain daemon.
//!
//! Runs a drain cycle immediately on startup (jobs may have queued while the
//! worker was down), then on a fixed interval. The HTTP drain endpoint can
//! trigger extra cycles in between; the job store's claim semantics keep the
//! two from colliding.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::queue::DrainWorker;

pub fn spawn_drain_daemon(worker: Arc<DrainWorker>, interval: Duration) -> JoinHandle<()> {
    DrainDaemon { worker, interval }.spawn()
}

struct DrainDaemon {
    worker: Arc<DrainWorker>,
    interval: Duration,
}

impl DrainDaemon {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        info!(interval_seconds = self.interval.as_secs(), "drain daemon started");
        loop {
            match self.worker.drain().await {
                Ok(summary) => {
                    if summary.claimed > 0 || summary.recovered > 0 {
                        info!(
                            claimed = summary.claimed,
                            completed = summary.completed,
                            failed = summary.failed,
                            recovered = summary.recovered,
                            "scheduled drain cycle finished"
                        );
                    }
                }
                Err(err) => error!(error = %err, "scheduled drain cycle failed"),
            }
            sleep(self.interval).await;
        }
    }
}
