use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge, histogram};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use fis_storage::{is_busy, Database, OutboxError};

const BATCH_LIMIT: i64 = 1000;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Background worker that purges settled outbox rows and checkpoints the WAL.
#[derive(Clone)]
pub struct MaintenanceWorker {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
    retention: Duration,
}

impl MaintenanceWorker {
    pub fn new(
        database: Database,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
        retention: Duration,
    ) -> Self {
        Self {
            database,
            clock,
            interval: DEFAULT_INTERVAL,
            retention,
        }
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "storage", error = %err, "maintenance run failed");
            }
        }
    }

    /// Executes one maintenance cycle (outbox purge, pending gauge, checkpoint).
    pub async fn run_once(&self) -> Result<MaintenanceReport, MaintenanceError> {
        let now = (self.clock)();
        let retention =
            ChronoDuration::from_std(self.retention).unwrap_or_else(|_| ChronoDuration::hours(72));
        let threshold = now - retention;

        let (deleted, busy) = self.purge_delivered(threshold).await?;
        info!(
            stage = "storage",
            table = "notification_outbox",
            deleted,
            busy,
            threshold = %threshold.to_rfc3339(),
            "outbox retention sweep completed"
        );

        let pending = self.database.outbox().pending_count().await?;
        gauge!("outbox_pending").set(pending as f64);
        if pending > 0 {
            info!(stage = "storage", pending, "outbox rows awaiting delivery");
        }

        self.run_checkpoint().await?;

        Ok(MaintenanceReport {
            deleted,
            busy,
            pending,
        })
    }

    async fn purge_delivered(&self, threshold: DateTime<Utc>) -> Result<(u64, bool), MaintenanceError> {
        let mut total_deleted = 0u64;
        let mut busy = false;

        loop {
            match self
                .database
                .outbox()
                .purge_delivered_before(threshold, BATCH_LIMIT)
                .await
            {
                Ok(0) => break,
                Ok(batch_deleted) => {
                    total_deleted += batch_deleted;
                    counter!("db_ttl_deleted_total", "table" => "notification_outbox")
                        .increment(batch_deleted);
                }
                Err(err) => {
                    if is_busy(&err) {
                        busy = true;
                        counter!("db_busy_total", "op" => "ttl").increment(1);
                        warn!(stage = "storage", table = "notification_outbox", error = %err, "outbox purge hit busy timeout");
                        break;
                    }

                    return Err(MaintenanceError::Purge { source: err });
                }
            }
        }

        Ok((total_deleted, busy))
    }

    async fn run_checkpoint(&self) -> Result<(), MaintenanceError> {
        let start = std::time::Instant::now();
        match self.database.wal_checkpoint_truncate().await {
            Ok(stats) => {
                let duration = start.elapsed().as_secs_f64();
                histogram!("db_checkpoint_seconds").record(duration);
                if stats.busy_frames > 0 {
                    counter!("db_busy_total", "op" => "checkpoint").increment(1);
                    warn!(
                        stage = "storage",
                        busy_frames = stats.busy_frames,
                        log_frames = stats.log_frames,
                        checkpointed_frames = stats.checkpointed_frames,
                        duration_secs = duration,
                        "WAL checkpoint completed with busy frames"
                    );
                } else {
                    info!(
                        stage = "storage",
                        log_frames = stats.log_frames,
                        checkpointed_frames = stats.checkpointed_frames,
                        duration_secs = duration,
                        "WAL checkpoint completed"
                    );
                }
                Ok(())
            }
            Err(err) if is_busy(&err) => {
                counter!("db_busy_total", "op" => "checkpoint").increment(1);
                warn!(stage = "storage", error = %err, "WAL checkpoint hit busy timeout");
                Ok(())
            }
            Err(err) => Err(MaintenanceError::Checkpoint { source: err }),
        }
    }
}

/// What one maintenance cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub deleted: u64,
    pub busy: bool,
    pub pending: i64,
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("failed to purge delivered outbox rows")]
    Purge {
        #[source]
        source: SqlxError,
    },
    #[error("failed to count pending outbox rows: {0}")]
    Outbox(#[from] OutboxError),
    #[error("failed to run WAL checkpoint")]
    Checkpoint {
        #[source]
        source: SqlxError,
    },
}
