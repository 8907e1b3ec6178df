use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{interval, timeout, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use fis_core::types::{DeliveryStatus, FlightNotification};
use fis_partners::{NotifierSet, NotifyError};
use fis_storage::{Database, OutboxEntry, OutboxError};

/// Upper bound for the delay between two delivery attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_BATCH_SIZE: i64 = 100;
const CHANNEL_CAPACITY: usize = 256;

/// Delivery tuning for the outbox worker.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub base_backoff: Duration,
    pub batch_size: i64,
}

impl DispatchSettings {
    pub fn new(interval: Duration, max_attempts: u32, timeout: Duration) -> Self {
        Self {
            interval,
            max_attempts,
            timeout,
            base_backoff: DEFAULT_BASE_BACKOFF,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Delay before attempt `attempts + 1`: `base * 2^(attempts - 1)`, capped at
/// [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

/// Handle used by the operations service to request immediate delivery.
#[derive(Clone)]
pub struct OutboxDispatcher {
    sender: mpsc::Sender<Vec<String>>,
}

impl OutboxDispatcher {
    pub fn new(
        database: Database,
        notifiers: NotifierSet,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
        settings: DispatchSettings,
    ) -> (Self, DispatchWorker) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = DispatchWorker {
            database,
            notifiers,
            clock,
            receiver,
            settings,
        };
        (Self { sender }, worker)
    }

    /// Hands freshly committed outbox ids to the worker without waiting.
    /// When the channel is full or closed the periodic sweep delivers them.
    pub fn notify(&self, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        match self.sender.try_send(ids) {
            Ok(()) => {}
            Err(TrySendError::Full(ids)) => {
                debug!(stage = "outbox", count = ids.len(), "dispatch channel full; deferring to sweep");
            }
            Err(TrySendError::Closed(ids)) => {
                warn!(stage = "outbox", count = ids.len(), "dispatch worker stopped; deferring to sweep");
            }
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Retrying { next_attempt_at: DateTime<Utc> },
    Failed,
}

impl DeliveryOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Retrying { .. } => "retry",
            Self::Failed => "failed",
        }
    }
}

/// Counts of a sweep over due rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub delivered: u32,
    pub retrying: u32,
    pub failed: u32,
}

impl SweepSummary {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Retrying { .. } => self.retrying += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }

    fn total(&self) -> u32 {
        self.delivered + self.retrying + self.failed
    }
}

/// Background worker that drains the notification outbox.
pub struct DispatchWorker {
    database: Database,
    notifiers: NotifierSet,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    receiver: mpsc::Receiver<Vec<String>>,
    settings: DispatchSettings,
}

impl DispatchWorker {
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_due().await {
                        error!(stage = "outbox", error = %err, "outbox sweep failed");
                    }
                }
                Some(ids) = self.receiver.recv() => {
                    for id in ids {
                        if let Err(err) = self.deliver_by_id(&id).await {
                            error!(stage = "outbox", outbox_id = %id, error = %err, "immediate delivery failed");
                        }
                    }
                }
                else => break,
            }
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Delivers every pending row whose next attempt is due.
    pub async fn run_due(&self) -> Result<SweepSummary, DispatchError> {
        let mut summary = SweepSummary::default();
        loop {
            let due = self
                .database
                .outbox()
                .due(self.now(), self.settings.batch_size)
                .await?;
            let batch_len = due.len() as i64;
            for entry in due {
                let outcome = self.deliver(entry).await?;
                summary.record(&outcome);
            }
            if batch_len < self.settings.batch_size {
                break;
            }
        }

        if summary.total() > 0 {
            info!(
                stage = "outbox",
                delivered = summary.delivered,
                retrying = summary.retrying,
                failed = summary.failed,
                "outbox sweep completed"
            );
        }
        Ok(summary)
    }

    /// Delivers one row right away. Rows that are no longer pending, or whose
    /// next attempt lies in the future, are left to the sweep.
    pub async fn deliver_by_id(&self, id: &str) -> Result<Option<DeliveryOutcome>, DispatchError> {
        let Some(entry) = self.database.outbox().fetch(id).await? else {
            warn!(stage = "outbox", outbox_id = %id, "outbox row vanished before delivery");
            return Ok(None);
        };
        if entry.status != DeliveryStatus::Pending || entry.next_attempt_at > self.now() {
            return Ok(None);
        }
        self.deliver(entry).await.map(Some)
    }

    async fn deliver(&self, entry: OutboxEntry) -> Result<DeliveryOutcome, DispatchError> {
        let attempts = entry.attempts + 1;
        let partner = entry.partner;

        let result = match serde_json::from_str::<FlightNotification>(&entry.payload_json) {
            Ok(notification) => self.push(&entry, &notification).await,
            Err(err) => {
                // A payload that cannot be decoded will never succeed.
                let message = format!("undecodable payload: {err}");
                return self.settle_failed(&entry, attempts, &message).await;
            }
        };

        let outbox = self.database.outbox();
        let now = self.now();
        let outcome = match result {
            Ok(()) => {
                outbox.mark_delivered(&entry.id, attempts, now).await?;
                info!(
                    stage = "outbox",
                    outbox_id = %entry.id,
                    event_id = %entry.event_id,
                    partner = %partner,
                    attempts,
                    "partner notified"
                );
                DeliveryOutcome::Delivered
            }
            Err(err) if attempts >= self.settings.max_attempts => {
                return self.settle_failed(&entry, attempts, &err.to_string()).await;
            }
            Err(err) => {
                let delay = backoff_delay(self.settings.base_backoff, attempts);
                let next_attempt_at = now
                    + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::minutes(15));
                outbox
                    .mark_retry(&entry.id, attempts, next_attempt_at, &err.to_string(), now)
                    .await?;
                warn!(
                    stage = "outbox",
                    outbox_id = %entry.id,
                    event_id = %entry.event_id,
                    partner = %partner,
                    attempts,
                    error = %err,
                    kind = err.kind(),
                    next_attempt_at = %next_attempt_at.to_rfc3339(),
                    "partner notification failed; retry scheduled"
                );
                DeliveryOutcome::Retrying { next_attempt_at }
            }
        };

        counter!("partner_notifications_total", "partner" => partner.as_str(), "result" => outcome.label())
            .increment(1);
        Ok(outcome)
    }

    async fn push(
        &self,
        entry: &OutboxEntry,
        notification: &FlightNotification,
    ) -> Result<(), NotifyError> {
        let updater = self
            .notifiers
            .get(entry.partner)
            .ok_or(NotifyError::NotConfigured(entry.partner))?;

        let start = Instant::now();
        let result = timeout(self.settings.timeout, updater.push(notification))
            .await
            .unwrap_or(Err(NotifyError::Timeout(self.settings.timeout)));
        histogram!("partner_notify_latency_seconds", "partner" => entry.partner.as_str())
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn settle_failed(
        &self,
        entry: &OutboxEntry,
        attempts: u32,
        message: &str,
    ) -> Result<DeliveryOutcome, DispatchError> {
        self.database
            .outbox()
            .mark_failed(&entry.id, attempts, message, self.now())
            .await?;
        error!(
            stage = "outbox",
            outbox_id = %entry.id,
            event_id = %entry.event_id,
            flight_id = entry.flight_id,
            partner = %entry.partner,
            attempts,
            error = %message,
            "partner notification abandoned"
        );
        counter!("partner_notifications_total", "partner" => entry.partner.as_str(), "result" => "failed")
            .increment(1);
        Ok(DeliveryOutcome::Failed)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{apply_gate_change, setup_context, RecordingUpdater};
    use fis_core::types::Partner;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(240));
        assert_eq!(backoff_delay(base, 6), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, 400), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn successful_push_marks_row_delivered() {
        let updater = RecordingUpdater::succeeding(Partner::PassengerMessaging);
        let ctx = setup_context(vec![updater.clone()]).await;
        let ids = apply_gate_change(&ctx).await;
        assert_eq!(ids.len(), 1);

        let outcome = ctx
            .worker
            .deliver_by_id(&ids[0])
            .await
            .expect("deliver")
            .expect("pending row");
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let entry = ctx
            .database
            .outbox()
            .fetch(&ids[0])
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(entry.status, DeliveryStatus::Delivered);
        assert_eq!(entry.attempts, 1);
        assert_eq!(updater.received().len(), 1);
        assert_eq!(updater.received()[0].event_id, entry.event_id);

        let again = ctx.worker.deliver_by_id(&ids[0]).await.expect("deliver");
        assert!(again.is_none(), "settled rows are not delivered twice");
    }

    #[tokio::test]
    async fn failure_schedules_retry_with_backoff() {
        let updater = RecordingUpdater::failing(Partner::PassengerMessaging);
        let ctx = setup_context(vec![updater.clone()]).await;
        let ids = apply_gate_change(&ctx).await;

        let outcome = ctx
            .worker
            .deliver_by_id(&ids[0])
            .await
            .expect("deliver")
            .expect("pending row");
        let expected_next = ctx.now + ChronoDuration::seconds(30);
        assert_eq!(
            outcome,
            DeliveryOutcome::Retrying {
                next_attempt_at: expected_next
            }
        );

        let entry = ctx
            .database
            .outbox()
            .fetch(&ids[0])
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(entry.status, DeliveryStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert!(entry.last_error.is_some());

        let summary = ctx.worker.run_due().await.expect("sweep");
        assert_eq!(summary, SweepSummary::default(), "row is not due yet");

        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(flight.gate_id, Some(ctx.network.origin_gate_id));
    }

    #[tokio::test]
    async fn final_attempt_marks_row_failed() {
        let updater = RecordingUpdater::failing(Partner::PassengerMessaging);
        let ctx = setup_context(vec![updater.clone()]).await;
        let ids = apply_gate_change(&ctx).await;

        let worker = DispatchWorker {
            settings: DispatchSettings {
                max_attempts: 1,
                ..ctx.worker.settings
            },
            database: ctx.database.clone(),
            notifiers: ctx.worker.notifiers.clone(),
            clock: ctx.worker.clock.clone(),
            receiver: mpsc::channel(1).1,
        };
        let outcome = worker
            .deliver_by_id(&ids[0])
            .await
            .expect("deliver")
            .expect("pending row");
        assert_eq!(outcome, DeliveryOutcome::Failed);

        let entry = ctx
            .database
            .outbox()
            .fetch(&ids[0])
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(entry.status, DeliveryStatus::Failed);
        assert_eq!(entry.attempts, 1);
    }

    struct SlowUpdater;

    #[async_trait::async_trait]
    impl fis_partners::StatusUpdater for SlowUpdater {
        fn partner(&self) -> Partner {
            Partner::PassengerMessaging
        }

        async fn push(&self, _notification: &FlightNotification) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_partner_times_out_and_is_rescheduled() {
        let ctx = setup_context(vec![RecordingUpdater::succeeding(
            Partner::PassengerMessaging,
        )])
        .await;
        let ids = apply_gate_change(&ctx).await;

        let worker = DispatchWorker {
            settings: DispatchSettings {
                timeout: Duration::from_millis(50),
                ..ctx.worker.settings
            },
            database: ctx.database.clone(),
            notifiers: NotifierSet::new().with(Arc::new(SlowUpdater)),
            clock: ctx.worker.clock.clone(),
            receiver: mpsc::channel(1).1,
        };
        let outcome = worker
            .deliver_by_id(&ids[0])
            .await
            .expect("deliver")
            .expect("pending row");
        assert_eq!(
            outcome,
            DeliveryOutcome::Retrying {
                next_attempt_at: ctx.now + ChronoDuration::seconds(30)
            }
        );

        let entry = ctx
            .database
            .outbox()
            .fetch(&ids[0])
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(entry.status, DeliveryStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert!(entry
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("did not answer")));
    }

    #[tokio::test]
    async fn spawned_worker_delivers_handed_off_rows() {
        let updater = RecordingUpdater::succeeding(Partner::PassengerMessaging);
        let ctx = setup_context(vec![updater.clone()]).await;
        let worker = ctx.worker;
        let handle = worker.spawn();
        // Let the start-up sweep pass; the next tick is an hour away.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = ctx
            .operations
            .apply(
                ctx.flight_id,
                fis_core::change::FlightChange::Gate {
                    gate_id: Some(ctx.network.origin_gate_id),
                },
                Default::default(),
            )
            .await
            .expect("apply");
        let id = match outcome {
            crate::operations::ApplyOutcome::Applied(applied) => applied.notifications[0].clone(),
            _ => panic!("gate change should apply"),
        };

        let outbox = ctx.database.outbox();
        let delivered = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let entry = outbox.fetch(&id).await.expect("fetch").expect("row");
                if entry.status == DeliveryStatus::Delivered {
                    return entry;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("worker delivers without waiting for the sweep");
        assert_eq!(delivered.attempts, 1);
        assert_eq!(updater.received().len(), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn sweep_delivers_due_rows() {
        let updater = RecordingUpdater::succeeding(Partner::PassengerMessaging);
        let ctx = setup_context(vec![updater.clone()]).await;
        apply_gate_change(&ctx).await;

        let summary = ctx.worker.run_due().await.expect("sweep");
        assert_eq!(summary.delivered, 1);
        assert_eq!(ctx.database.outbox().pending_count().await.expect("count"), 0);
    }
}
