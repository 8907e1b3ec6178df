use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use metrics::counter;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use fis_core::change::{plan_change, plan_details, ChangePlan, FlightChange};
use fis_core::input::FlightInput;
use fis_core::types::{
    AuditEvent, ChangeType, FieldChange, Flight, FlightNotification, Partner, DEFAULT_STATUS_CODE,
};
use fis_core::validation::{validate_flight, ValidationErrors};
use fis_storage::{
    is_busy, AuditLogError, Database, NewAuditEvent, NewFlight, NewOutboxEntry, OutboxError,
    RecordError,
};

use crate::dispatcher::OutboxDispatcher;
use crate::feed::FlightFeed;

/// Caller-supplied context of a change.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub actor: Option<String>,
    /// When set, the change is rejected unless the stored version matches.
    pub expected_version: Option<i64>,
}

/// Committed result of a change.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedChange {
    pub flight: Flight,
    pub events: Vec<AuditEvent>,
    pub notifications: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ApplyOutcome {
    Applied(AppliedChange),
    Unchanged { flight: Flight, unchanged: bool },
}

impl ApplyOutcome {
    fn unchanged(flight: Flight) -> Self {
        Self::Unchanged {
            flight,
            unchanged: true,
        }
    }

    pub fn flight(&self) -> &Flight {
        match self {
            Self::Applied(applied) => &applied.flight,
            Self::Unchanged { flight, .. } => flight,
        }
    }
}

/// Flight operations service: every write to a flight goes through here so
/// that the record, its audit trail and the partner outbox commit together.
#[derive(Clone)]
pub struct FlightOperations {
    database: Database,
    partners: Arc<[Partner]>,
    dispatcher: OutboxDispatcher,
    feed: FlightFeed,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl FlightOperations {
    pub fn new(
        database: Database,
        partners: impl IntoIterator<Item = Partner>,
        dispatcher: OutboxDispatcher,
        feed: FlightFeed,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            database,
            partners: partners.into_iter().collect(),
            dispatcher,
            feed,
            clock,
        }
    }

    /// Stored timestamps keep millisecond precision; truncate so returned
    /// values equal what a later read yields.
    fn now(&self) -> DateTime<Utc> {
        (self.clock)().trunc_subsecs(3)
    }

    /// Applies an operational change (status, gate, baggage claim, times).
    pub async fn apply(
        &self,
        flight_id: i64,
        change: FlightChange,
        options: ApplyOptions,
    ) -> Result<ApplyOutcome, OperationError> {
        let change = change.normalized();
        let mut tx = self.database.begin_write(self.now()).await?;
        let current = self.database.flights().fetch_in(&mut tx, flight_id).await?;
        check_version(&current, options.expected_version)?;
        self.validate_change(&mut tx, &current, &change).await?;

        let plan = plan_change(&current, &change);
        validate_times(&plan.next)?;
        self.commit_plan(tx, plan, &options).await
    }

    /// Edits schedule-level attributes. Audited, but not routed to partners.
    ///
    /// The status is not part of the schedule and is rejected here. An
    /// assigned gate or baggage claim must still belong to the (possibly new)
    /// origin or destination airport.
    pub async fn update_details(
        &self,
        flight_id: i64,
        input: FlightInput,
        options: ApplyOptions,
    ) -> Result<ApplyOutcome, OperationError> {
        let input = input.normalized();
        if input.status_code.is_some() {
            let mut errors = ValidationErrors::new();
            errors.add(
                "status_code",
                "cannot be edited with the flight details; use PUT /flights/{id}/status",
            );
            return Err(OperationError::Invalid(errors));
        }
        validate_flight(&input)?;

        let mut tx = self.database.begin_write(self.now()).await?;
        let current = self.database.flights().fetch_in(&mut tx, flight_id).await?;
        check_version(&current, options.expected_version)?;

        let plan = plan_details(&current, &input);
        self.validate_placement(&mut tx, &plan.next).await?;
        self.commit_plan(tx, plan, &options).await
    }

    pub async fn create_flight(
        &self,
        input: FlightInput,
        actor: Option<&str>,
    ) -> Result<Flight, OperationError> {
        let input = input.normalized();
        validate_flight(&input)?;

        let now = self.now();
        let status_code = input
            .status_code
            .clone()
            .unwrap_or_else(|| DEFAULT_STATUS_CODE.to_string());

        let mut tx = self.database.begin_write(now).await?;
        self.ensure_status(&mut tx, &status_code, "status_code").await?;

        let flights = self.database.flights();
        let flight = flights
            .insert(
                &mut tx,
                &NewFlight {
                    airline_id: input.airline_id,
                    flight_number: input.flight_number,
                    origin_airport_id: input.origin_airport_id,
                    destination_airport_id: input.destination_airport_id,
                    scheduled_departure: input.scheduled_departure,
                    scheduled_arrival: input.scheduled_arrival,
                    status_code,
                },
                now,
            )
            .await?;
        let board = flights.board_entry_in(&mut tx, flight.id).await?;

        let change = FieldChange {
            field: "flight".to_string(),
            old_value: None,
            new_value: Some(board.designator.clone()),
        };
        let event = self
            .append_event(&mut tx, flight.id, ChangeType::Created, &change, actor, now)
            .await?;
        tx.commit().await?;

        counter!("flight_changes_total", "type" => ChangeType::Created.as_str()).increment(1);
        info!(stage = "operations", flight_id = flight.id, designator = %board.designator, "flight created");
        self.feed.publish(FlightNotification {
            event_id: event.id,
            change_type: ChangeType::Created,
            changes: vec![change],
            flight: board,
            occurred_at: now,
        });
        Ok(flight)
    }

    /// Deletes a flight. Its audit history is kept.
    pub async fn delete_flight(
        &self,
        flight_id: i64,
        options: ApplyOptions,
    ) -> Result<(), OperationError> {
        let now = self.now();
        let flights = self.database.flights();
        let mut tx = self.database.begin_write(now).await?;
        let current = flights.fetch_in(&mut tx, flight_id).await?;
        check_version(&current, options.expected_version)?;
        let board = flights.board_entry_in(&mut tx, flight_id).await?;

        flights.delete(&mut tx, flight_id).await?;
        let change = FieldChange {
            field: "flight".to_string(),
            old_value: Some(board.designator.clone()),
            new_value: None,
        };
        let event = self
            .append_event(
                &mut tx,
                flight_id,
                ChangeType::Deleted,
                &change,
                options.actor.as_deref(),
                now,
            )
            .await?;
        tx.commit().await?;

        counter!("flight_changes_total", "type" => ChangeType::Deleted.as_str()).increment(1);
        info!(stage = "operations", flight_id, designator = %board.designator, "flight deleted");
        self.feed.publish(FlightNotification {
            event_id: event.id,
            change_type: ChangeType::Deleted,
            changes: vec![change],
            flight: board,
            occurred_at: now,
        });
        Ok(())
    }

    async fn commit_plan(
        &self,
        mut tx: Transaction<'static, Sqlite>,
        plan: ChangePlan,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome, OperationError> {
        if plan.is_noop() {
            tx.rollback().await?;
            return Ok(ApplyOutcome::unchanged(plan.next));
        }

        let now = self.now();
        let flights = self.database.flights();
        let flight = flights.apply(&mut tx, &plan.next, now).await?;

        let mut events = Vec::with_capacity(plan.changes.len());
        for change in &plan.changes {
            let event = self
                .append_event(
                    &mut tx,
                    flight.id,
                    plan.change_type,
                    change,
                    options.actor.as_deref(),
                    now,
                )
                .await?;
            events.push(event);
        }

        // The first audit row identifies the change towards partners.
        let event_id = events
            .first()
            .map(|event| event.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let notification = FlightNotification {
            event_id,
            change_type: plan.change_type,
            changes: plan.changes,
            flight: flights.board_entry_in(&mut tx, flight.id).await?,
            occurred_at: now,
        };
        let notifications = self.enqueue(&mut tx, &notification, now).await?;
        tx.commit().await?;

        counter!("flight_changes_total", "type" => plan.change_type.as_str()).increment(1);
        info!(
            stage = "operations",
            flight_id = flight.id,
            change_type = %plan.change_type,
            fields = notification.changes.len(),
            version = flight.version,
            actor = options.actor.as_deref().unwrap_or("-"),
            outbox = notifications.len(),
            "flight change committed"
        );

        self.dispatcher.notify(notifications.clone());
        self.feed.publish(notification);

        Ok(ApplyOutcome::Applied(AppliedChange {
            flight,
            events,
            notifications,
        }))
    }

    async fn enqueue(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        notification: &FlightNotification,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, OperationError> {
        let interested: Vec<Partner> = self
            .partners
            .iter()
            .copied()
            .filter(|partner| partner.interested_in(notification.change_type))
            .collect();
        if interested.is_empty() {
            return Ok(Vec::new());
        }

        let payload_json = serde_json::to_string(notification)?;
        let outbox = self.database.outbox();
        let mut ids = Vec::with_capacity(interested.len());
        for partner in interested {
            let id = Uuid::new_v4().to_string();
            outbox
                .enqueue(
                    tx,
                    &NewOutboxEntry {
                        id: id.clone(),
                        event_id: &notification.event_id,
                        flight_id: notification.flight.id,
                        partner,
                        change_type: notification.change_type,
                        payload_json: &payload_json,
                        created_at: now,
                    },
                )
                .await?;
            counter!("outbox_enqueued_total", "partner" => partner.as_str()).increment(1);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn append_event(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        flight_id: i64,
        change_type: ChangeType,
        change: &FieldChange,
        actor: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Result<AuditEvent, OperationError> {
        let event = self
            .database
            .audit_log()
            .append(
                tx,
                NewAuditEvent {
                    flight_id,
                    change_type,
                    change,
                    actor,
                    occurred_at,
                },
            )
            .await?;
        Ok(event)
    }

    async fn validate_change(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        current: &Flight,
        change: &FlightChange,
    ) -> Result<(), OperationError> {
        match change {
            FlightChange::Status { code } => self.ensure_status(tx, code, "code").await,
            FlightChange::Gate {
                gate_id: Some(gate_id),
            } => {
                let airport = self.database.gates().airport_of(tx, *gate_id).await?;
                check_airport(
                    "gate_id",
                    airport,
                    current.origin_airport_id,
                    "gate must belong to a terminal of the origin airport",
                )
            }
            FlightChange::BaggageClaim {
                baggage_claim_id: Some(claim_id),
            } => {
                let airport = self
                    .database
                    .baggage_claims()
                    .airport_of(tx, *claim_id)
                    .await?;
                check_airport(
                    "baggage_claim_id",
                    airport,
                    current.destination_airport_id,
                    "baggage claim must belong to a terminal of the destination airport",
                )
            }
            FlightChange::Gate { gate_id: None }
            | FlightChange::BaggageClaim {
                baggage_claim_id: None,
            }
            | FlightChange::Times(_) => Ok(()),
        }
    }

    async fn validate_placement(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        next: &Flight,
    ) -> Result<(), OperationError> {
        if let Some(gate_id) = next.gate_id {
            let airport = self.database.gates().airport_of(tx, gate_id).await?;
            check_airport(
                "gate_id",
                airport,
                next.origin_airport_id,
                "assigned gate is not at the origin airport; clear the gate first",
            )?;
        }
        if let Some(claim_id) = next.baggage_claim_id {
            let airport = self
                .database
                .baggage_claims()
                .airport_of(tx, claim_id)
                .await?;
            check_airport(
                "baggage_claim_id",
                airport,
                next.destination_airport_id,
                "assigned baggage claim is not at the destination airport; clear the claim first",
            )?;
        }
        Ok(())
    }

    async fn ensure_status(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        code: &str,
        field: &str,
    ) -> Result<(), OperationError> {
        if self
            .database
            .flight_statuses()
            .fetch_in(tx, code)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let mut errors = ValidationErrors::new();
        errors.add(field, format!("unknown status code {code}"));
        Err(OperationError::Invalid(errors))
    }
}

fn check_version(current: &Flight, expected: Option<i64>) -> Result<(), OperationError> {
    match expected {
        Some(expected) if expected != current.version => {
            warn!(
                stage = "operations",
                flight_id = current.id,
                expected,
                actual = current.version,
                "stale flight version"
            );
            Err(OperationError::VersionConflict {
                expected,
                actual: current.version,
            })
        }
        _ => Ok(()),
    }
}

fn check_airport(
    field: &str,
    airport: Option<i64>,
    required: i64,
    message: &str,
) -> Result<(), OperationError> {
    let mut errors = ValidationErrors::new();
    match airport {
        None => errors.add(field, "does not exist"),
        Some(airport) if airport != required => errors.add(field, message),
        Some(_) => {}
    }
    errors.into_result().map_err(OperationError::Invalid)
}

fn validate_times(next: &Flight) -> Result<(), OperationError> {
    let mut errors = ValidationErrors::new();
    if let (Some(departure), Some(arrival)) = (next.actual_departure, next.actual_arrival) {
        if arrival <= departure {
            errors.add("actual_arrival", "must be after actual departure");
        }
    }
    if let (Some(departure), Some(arrival)) = (next.estimated_departure, next.estimated_arrival) {
        if arrival <= departure {
            errors.add("estimated_arrival", "must be after estimated departure");
        }
    }
    errors.into_result().map_err(OperationError::Invalid)
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("flight not found")]
    NotFound,
    #[error("flight version is {actual}, expected {expected}")]
    VersionConflict { expected: i64, actual: i64 },
    #[error("flight was modified concurrently")]
    ConcurrentModification,
    #[error("database is busy: {0}")]
    Busy(sqlx::Error),
    #[error("invalid change")]
    Invalid(ValidationErrors),
    #[error("record error: {0}")]
    Record(RecordError),
    #[error("audit log error: {0}")]
    AuditLog(#[from] AuditLogError),
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl OperationError {
    fn busy(err: sqlx::Error) -> Self {
        counter!("db_busy_total", "op" => "operations").increment(1);
        warn!(stage = "operations", error = %err, "database busy");
        Self::Busy(err)
    }
}

impl From<sqlx::Error> for OperationError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            Self::busy(err)
        } else {
            Self::Database(err)
        }
    }
}

impl From<RecordError> for OperationError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::NotFound => Self::NotFound,
            RecordError::Conflict => Self::ConcurrentModification,
            RecordError::Busy(err) => Self::busy(err),
            other => Self::Record(other),
        }
    }
}

impl From<ValidationErrors> for OperationError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Invalid(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{apply_gate_change, setup_context, RecordingUpdater};
    use chrono::Duration;
    use fis_core::change::TimesChange;

    fn options(actor: &str) -> ApplyOptions {
        ApplyOptions {
            actor: Some(actor.to_string()),
            expected_version: None,
        }
    }

    fn applied(outcome: ApplyOutcome) -> AppliedChange {
        match outcome {
            ApplyOutcome::Applied(applied) => applied,
            ApplyOutcome::Unchanged { .. } => panic!("expected change to apply"),
        }
    }

    #[tokio::test]
    async fn status_change_updates_audits_and_enqueues() {
        let ctx = setup_context(vec![
            RecordingUpdater::succeeding(Partner::PassengerMessaging),
            RecordingUpdater::succeeding(Partner::BaggageHandling),
        ])
        .await;
        let mut feed = ctx.feed.subscribe();

        let outcome = ctx
            .operations
            .apply(
                ctx.flight_id,
                FlightChange::Status {
                    code: "dly".to_string(),
                },
                options("ops-1"),
            )
            .await
            .expect("apply");
        let applied = applied(outcome);

        assert_eq!(applied.flight.status_code, "DLY");
        assert_eq!(applied.flight.version, 2);
        assert_eq!(applied.events.len(), 1);
        assert_eq!(applied.events[0].old_value.as_deref(), Some("SCH"));
        assert_eq!(applied.events[0].new_value.as_deref(), Some("DLY"));
        assert_eq!(applied.events[0].actor.as_deref(), Some("ops-1"));
        assert_eq!(applied.notifications.len(), 2);

        let history = ctx
            .database
            .audit_log()
            .list_for_flight(ctx.flight_id)
            .await
            .expect("history");
        assert_eq!(history.len(), 2, "created + status");

        let outbox = ctx
            .database
            .outbox()
            .list_for_flight(ctx.flight_id)
            .await
            .expect("outbox");
        assert_eq!(outbox.len(), 2);
        assert!(outbox.iter().all(|row| row.event_id == applied.events[0].id));

        let published = feed.recv().await.expect("feed");
        assert_eq!(published.change_type, ChangeType::Status);
        assert_eq!(published.flight.status_code, "DLY");
    }

    #[tokio::test]
    async fn reapplying_the_same_change_is_a_noop() {
        let ctx = setup_context(vec![RecordingUpdater::succeeding(
            Partner::PassengerMessaging,
        )])
        .await;
        let change = FlightChange::Gate {
            gate_id: Some(ctx.network.origin_gate_id),
        };
        ctx.operations
            .apply(ctx.flight_id, change.clone(), options("ops"))
            .await
            .expect("first apply");

        let outcome = ctx
            .operations
            .apply(ctx.flight_id, change, options("ops"))
            .await
            .expect("second apply");
        assert!(matches!(outcome, ApplyOutcome::Unchanged { unchanged: true, .. }));
        assert_eq!(outcome.flight().version, 2);

        let outbox = ctx
            .database
            .outbox()
            .list_for_flight(ctx.flight_id)
            .await
            .expect("outbox");
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn gate_change_is_not_routed_to_baggage_handling() {
        let ctx = setup_context(vec![
            RecordingUpdater::succeeding(Partner::PassengerMessaging),
            RecordingUpdater::succeeding(Partner::BaggageHandling),
        ])
        .await;
        let applied = applied(
            ctx.operations
                .apply(
                    ctx.flight_id,
                    FlightChange::Gate {
                        gate_id: Some(ctx.network.origin_gate_id),
                    },
                    ApplyOptions::default(),
                )
                .await
                .expect("apply"),
        );
        assert_eq!(applied.notifications.len(), 1);
        let row = ctx
            .database
            .outbox()
            .fetch(&applied.notifications[0])
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(row.partner, Partner::PassengerMessaging);
    }

    #[tokio::test]
    async fn unconfigured_partners_get_no_outbox_rows() {
        let ctx = setup_context(Vec::new()).await;
        let applied = applied(
            ctx.operations
                .apply(
                    ctx.flight_id,
                    FlightChange::Status {
                        code: "BRD".to_string(),
                    },
                    ApplyOptions::default(),
                )
                .await
                .expect("apply"),
        );
        assert!(applied.notifications.is_empty());
        assert_eq!(applied.events.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_writes() {
        let ctx = setup_context(Vec::new()).await;
        let err = ctx
            .operations
            .apply(
                ctx.flight_id,
                FlightChange::Status {
                    code: "BRD".to_string(),
                },
                ApplyOptions {
                    actor: None,
                    expected_version: Some(5),
                },
            )
            .await
            .expect_err("stale version");
        assert!(matches!(
            err,
            OperationError::VersionConflict {
                expected: 5,
                actual: 1
            }
        ));

        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(flight.status_code, "SCH");
        assert_eq!(flight.version, 1);
    }

    #[tokio::test]
    async fn unknown_status_and_foreign_gate_are_invalid() {
        let ctx = setup_context(Vec::new()).await;
        let err = ctx
            .operations
            .apply(
                ctx.flight_id,
                FlightChange::Status {
                    code: "XXX".to_string(),
                },
                ApplyOptions::default(),
            )
            .await
            .expect_err("unknown status");
        assert!(matches!(err, OperationError::Invalid(ref errors) if errors.fields().contains_key("code")));

        let err = ctx
            .operations
            .apply(
                ctx.flight_id,
                FlightChange::Gate {
                    gate_id: Some(ctx.network.destination_gate_id),
                },
                ApplyOptions::default(),
            )
            .await
            .expect_err("gate at destination");
        assert!(matches!(err, OperationError::Invalid(ref errors) if errors.fields().contains_key("gate_id")));

        let err = ctx
            .operations
            .apply(
                ctx.flight_id,
                FlightChange::BaggageClaim {
                    baggage_claim_id: Some(9_999),
                },
                ApplyOptions::default(),
            )
            .await
            .expect_err("missing claim");
        assert!(matches!(err, OperationError::Invalid(ref errors) if errors.fields().contains_key("baggage_claim_id")));
    }

    #[tokio::test]
    async fn missing_flight_is_not_found() {
        let ctx = setup_context(Vec::new()).await;
        let err = ctx
            .operations
            .apply(
                9_999,
                FlightChange::Gate { gate_id: None },
                ApplyOptions::default(),
            )
            .await
            .expect_err("missing");
        assert!(matches!(err, OperationError::NotFound));
    }

    #[tokio::test]
    async fn times_change_audits_each_field() {
        let ctx = setup_context(vec![RecordingUpdater::succeeding(
            Partner::PassengerMessaging,
        )])
        .await;
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        let applied = applied(
            ctx.operations
                .apply(
                    ctx.flight_id,
                    FlightChange::Times(TimesChange {
                        estimated_departure: Some(flight.scheduled_departure + Duration::minutes(40)),
                        estimated_arrival: Some(flight.scheduled_arrival + Duration::minutes(30)),
                        ..TimesChange::default()
                    }),
                    options("ops"),
                )
                .await
                .expect("apply"),
        );
        assert_eq!(applied.events.len(), 2);
        assert_eq!(applied.notifications.len(), 1);
        assert_eq!(
            applied.flight.estimated_departure,
            Some(flight.scheduled_departure + Duration::minutes(40))
        );

        let err = ctx
            .operations
            .apply(
                ctx.flight_id,
                FlightChange::Times(TimesChange {
                    actual_departure: Some(flight.scheduled_departure),
                    actual_arrival: Some(flight.scheduled_departure - Duration::minutes(5)),
                    ..TimesChange::default()
                }),
                ApplyOptions::default(),
            )
            .await
            .expect_err("arrival before departure");
        assert!(matches!(err, OperationError::Invalid(_)));
    }

    #[tokio::test]
    async fn details_edit_is_audited_but_not_routed() {
        let ctx = setup_context(vec![
            RecordingUpdater::succeeding(Partner::PassengerMessaging),
            RecordingUpdater::succeeding(Partner::BaggageHandling),
        ])
        .await;
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        let applied = applied(
            ctx.operations
                .update_details(
                    ctx.flight_id,
                    FlightInput {
                        airline_id: flight.airline_id,
                        flight_number: "118".to_string(),
                        origin_airport_id: flight.origin_airport_id,
                        destination_airport_id: flight.destination_airport_id,
                        scheduled_departure: flight.scheduled_departure,
                        scheduled_arrival: flight.scheduled_arrival,
                        status_code: None,
                    },
                    options("admin"),
                )
                .await
                .expect("update"),
        );
        assert_eq!(applied.flight.flight_number, "118");
        assert_eq!(applied.events.len(), 1);
        assert_eq!(applied.events[0].change_type, ChangeType::Details);
        assert!(applied.notifications.is_empty());
    }

    fn details_of(flight: &Flight) -> FlightInput {
        FlightInput {
            airline_id: flight.airline_id,
            flight_number: flight.flight_number.clone(),
            origin_airport_id: flight.origin_airport_id,
            destination_airport_id: flight.destination_airport_id,
            scheduled_departure: flight.scheduled_departure,
            scheduled_arrival: flight.scheduled_arrival,
            status_code: None,
        }
    }

    fn swapped(flight: &Flight) -> FlightInput {
        FlightInput {
            origin_airport_id: flight.destination_airport_id,
            destination_airport_id: flight.origin_airport_id,
            ..details_of(flight)
        }
    }

    #[tokio::test]
    async fn details_edit_rejects_status_code() {
        let ctx = setup_context(Vec::new()).await;
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        let err = ctx
            .operations
            .update_details(
                ctx.flight_id,
                FlightInput {
                    status_code: Some("CNL".to_string()),
                    ..details_of(&flight)
                },
                ApplyOptions::default(),
            )
            .await
            .expect_err("status via details");
        assert!(matches!(err, OperationError::Invalid(ref errors) if errors.fields().contains_key("status_code")));

        let stored = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(stored.status_code, "SCH");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn moving_the_origin_away_from_the_assigned_gate_is_invalid() {
        let ctx = setup_context(Vec::new()).await;
        apply_gate_change(&ctx).await;
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");

        let err = ctx
            .operations
            .update_details(ctx.flight_id, swapped(&flight), ApplyOptions::default())
            .await
            .expect_err("gate left behind");
        assert!(matches!(err, OperationError::Invalid(ref errors) if errors.fields().contains_key("gate_id")));
        let stored = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(stored.origin_airport_id, ctx.network.origin_id);

        ctx.operations
            .apply(
                ctx.flight_id,
                FlightChange::Gate { gate_id: None },
                ApplyOptions::default(),
            )
            .await
            .expect("clear gate");
        let applied = applied(
            ctx.operations
                .update_details(ctx.flight_id, swapped(&flight), ApplyOptions::default())
                .await
                .expect("swap once the gate is cleared"),
        );
        assert_eq!(applied.flight.origin_airport_id, ctx.network.destination_id);
    }

    #[tokio::test]
    async fn moving_the_destination_away_from_the_assigned_claim_is_invalid() {
        let ctx = setup_context(Vec::new()).await;
        ctx.operations
            .apply(
                ctx.flight_id,
                FlightChange::BaggageClaim {
                    baggage_claim_id: Some(ctx.network.destination_claim_id),
                },
                ApplyOptions::default(),
            )
            .await
            .expect("assign claim");
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");

        let err = ctx
            .operations
            .update_details(ctx.flight_id, swapped(&flight), ApplyOptions::default())
            .await
            .expect_err("claim left behind");
        assert!(matches!(err, OperationError::Invalid(ref errors) if errors.fields().contains_key("baggage_claim_id")));
        let stored = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(stored.destination_airport_id, ctx.network.destination_id);
        assert_eq!(stored.version, flight.version);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_changes_to_one_flight_all_commit() {
        let ctx = setup_context(Vec::new()).await;
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");

        for round in 0..10i64 {
            let mut handles = Vec::new();
            for offset in 0..2i64 {
                let operations = ctx.operations.clone();
                let estimate = flight.scheduled_departure + Duration::minutes(round * 2 + offset + 1);
                let flight_id = ctx.flight_id;
                handles.push(tokio::spawn(async move {
                    operations
                        .apply(
                            flight_id,
                            FlightChange::Times(TimesChange {
                                estimated_departure: Some(estimate),
                                ..TimesChange::default()
                            }),
                            ApplyOptions::default(),
                        )
                        .await
                }));
            }
            for handle in handles {
                let outcome = handle.await.expect("join");
                assert!(outcome.is_ok(), "round {round}: {outcome:?}");
            }
        }

        let stored = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(stored.version, 21);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_writers_on_the_same_version_get_one_conflict() {
        let ctx = setup_context(Vec::new()).await;
        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");

        for round in 0..5i64 {
            let version = ctx
                .database
                .flights()
                .fetch(ctx.flight_id)
                .await
                .expect("flight")
                .version;
            let mut handles = Vec::new();
            for offset in 0..2i64 {
                let operations = ctx.operations.clone();
                let estimate = flight.scheduled_departure + Duration::minutes(round * 2 + offset + 1);
                let flight_id = ctx.flight_id;
                handles.push(tokio::spawn(async move {
                    operations
                        .apply(
                            flight_id,
                            FlightChange::Times(TimesChange {
                                estimated_departure: Some(estimate),
                                ..TimesChange::default()
                            }),
                            ApplyOptions {
                                actor: None,
                                expected_version: Some(version),
                            },
                        )
                        .await
                }));
            }

            let mut applied_count = 0;
            let mut conflicts = 0;
            for handle in handles {
                match handle.await.expect("join") {
                    Ok(ApplyOutcome::Applied(_)) => applied_count += 1,
                    Err(OperationError::VersionConflict { .. }) => conflicts += 1,
                    other => panic!("round {round}: unexpected outcome {other:?}"),
                }
            }
            assert_eq!((applied_count, conflicts), (1, 1), "round {round}");
        }
    }

    #[tokio::test]
    async fn delete_keeps_history() {
        let ctx = setup_context(Vec::new()).await;
        ctx.operations
            .delete_flight(ctx.flight_id, options("admin"))
            .await
            .expect("delete");

        let err = ctx
            .database
            .flights()
            .fetch(ctx.flight_id)
            .await
            .expect_err("deleted");
        assert!(matches!(err, RecordError::NotFound));

        let history = ctx
            .database
            .audit_log()
            .list_for_flight(ctx.flight_id)
            .await
            .expect("history");
        let kinds: Vec<_> = history.iter().map(|event| event.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Created, ChangeType::Deleted]);
        assert_eq!(history[1].old_value.as_deref(), Some("BA117"));
    }

    #[tokio::test]
    async fn partner_failure_does_not_roll_back_the_change() {
        let updater = RecordingUpdater::failing(Partner::PassengerMessaging);
        let ctx = setup_context(vec![updater.clone()]).await;
        let applied = applied(
            ctx.operations
                .apply(
                    ctx.flight_id,
                    FlightChange::Gate {
                        gate_id: Some(ctx.network.origin_gate_id),
                    },
                    ApplyOptions::default(),
                )
                .await
                .expect("apply"),
        );
        ctx.worker
            .deliver_by_id(&applied.notifications[0])
            .await
            .expect("deliver");

        let flight = ctx.database.flights().fetch(ctx.flight_id).await.expect("flight");
        assert_eq!(flight.gate_id, Some(ctx.network.origin_gate_id));
        assert_eq!(flight.version, 2);
        assert_eq!(updater.received().len(), 1);
    }
}
