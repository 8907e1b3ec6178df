//! Shared fixtures for the app crate's tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, response::Response, Router};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use reqwest::StatusCode;
use serde_json::Value;
use tempfile::TempDir;

use fis_core::change::FlightChange;
use fis_core::input::{AirlineInput, AirportInput, CodeInput, FlightInput, TerminalInput};
use fis_core::types::{FlightNotification, Partner};
use fis_partners::{NotifierSet, NotifyError, StatusUpdater};
use fis_storage::Database;

use crate::dispatcher::{DispatchSettings, DispatchWorker, OutboxDispatcher};
use crate::feed::FlightFeed;
use crate::operations::{ApplyOptions, ApplyOutcome, FlightOperations};
use crate::router::{app_router, AppState};
use crate::telemetry;

/// Updater that records every notification and either accepts or rejects it.
pub struct RecordingUpdater {
    partner: Partner,
    fail: bool,
    received: Mutex<Vec<FlightNotification>>,
}

impl RecordingUpdater {
    pub fn succeeding(partner: Partner) -> Arc<Self> {
        Arc::new(Self {
            partner,
            fail: false,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(partner: Partner) -> Arc<Self> {
        Arc::new(Self {
            partner,
            fail: true,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<FlightNotification> {
        self.received.lock().expect("received lock").clone()
    }
}

#[async_trait]
impl StatusUpdater for RecordingUpdater {
    fn partner(&self) -> Partner {
        self.partner
    }

    async fn push(&self, notification: &FlightNotification) -> Result<(), NotifyError> {
        self.received
            .lock()
            .expect("received lock")
            .push(notification.clone());
        if self.fail {
            return Err(NotifyError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

pub struct Network {
    pub airline_id: i64,
    pub origin_id: i64,
    pub destination_id: i64,
    pub origin_gate_id: i64,
    pub destination_gate_id: i64,
    pub origin_claim_id: i64,
    pub destination_claim_id: i64,
}

pub struct TestContext {
    pub database: Database,
    pub state: AppState,
    pub operations: FlightOperations,
    pub worker: DispatchWorker,
    pub feed: FlightFeed,
    pub network: Network,
    pub flight_id: i64,
    pub now: DateTime<Utc>,
    _dir: TempDir,
}

impl TestContext {
    pub fn router(&self) -> Router {
        app_router(self.state.clone())
    }
}

/// Builds a database with LHR -> JFK reference data and flight BA117, plus
/// an operations service whose dispatcher is never spawned.
pub async fn setup_context(updaters: Vec<Arc<RecordingUpdater>>) -> TestContext {
    let metrics = telemetry::init_metrics().expect("metrics");
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("fis.db").display());
    let database = Database::connect(&url).await.expect("connect");
    database.run_migrations().await.expect("migrations");

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
    let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(move || now);

    let mut notifiers = NotifierSet::new();
    for updater in updaters {
        notifiers = notifiers.with(updater);
    }
    let partners: Vec<Partner> = notifiers.partners().collect();
    let (dispatcher, worker) = OutboxDispatcher::new(
        database.clone(),
        notifiers,
        clock.clone(),
        DispatchSettings::new(Duration::from_secs(3600), 8, Duration::from_secs(2)),
    );
    let feed = FlightFeed::new();
    let state = AppState::new(
        metrics,
        database.clone(),
        partners,
        dispatcher,
        feed.clone(),
        clock,
    );
    let operations = state.operations().clone();

    let network = seed_network(&database, now).await;
    let flight = operations
        .create_flight(
            FlightInput {
                airline_id: network.airline_id,
                flight_number: "117".to_string(),
                origin_airport_id: network.origin_id,
                destination_airport_id: network.destination_id,
                scheduled_departure: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
                scheduled_arrival: Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap(),
                status_code: None,
            },
            Some("seed"),
        )
        .await
        .expect("flight");

    TestContext {
        database,
        state,
        operations,
        worker,
        feed,
        network,
        flight_id: flight.id,
        now,
        _dir: dir,
    }
}

async fn seed_network(db: &Database, now: DateTime<Utc>) -> Network {
    let airline = db
        .airlines()
        .insert(
            &AirlineInput {
                iata_code: "BA".to_string(),
                icao_code: Some("BAW".to_string()),
                name: "British Airways".to_string(),
            },
            now,
        )
        .await
        .expect("airline");

    let mut airports = Vec::new();
    for (iata, city, timezone) in [
        ("LHR", "London", "Europe/London"),
        ("JFK", "New York", "America/New_York"),
    ] {
        let airport = db
            .airports()
            .insert(
                &AirportInput {
                    iata_code: iata.to_string(),
                    name: iata.to_string(),
                    city: city.to_string(),
                    country: "XX".to_string(),
                    timezone: timezone.to_string(),
                },
                now,
            )
            .await
            .expect("airport");
        let terminal = db
            .terminals()
            .insert(
                airport.id,
                &TerminalInput {
                    code: "T1".to_string(),
                    name: None,
                },
                now,
            )
            .await
            .expect("terminal");
        let gate = db
            .gates()
            .insert(
                terminal.id,
                &CodeInput {
                    code: "A1".to_string(),
                },
                now,
            )
            .await
            .expect("gate");
        let claim = db
            .baggage_claims()
            .insert(
                terminal.id,
                &CodeInput {
                    code: "3".to_string(),
                },
                now,
            )
            .await
            .expect("claim");
        airports.push((airport.id, gate.id, claim.id));
    }

    let (origin_id, origin_gate_id, origin_claim_id) = airports[0];
    let (destination_id, destination_gate_id, destination_claim_id) = airports[1];
    Network {
        airline_id: airline.id,
        origin_id,
        destination_id,
        origin_gate_id,
        destination_gate_id,
        origin_claim_id,
        destination_claim_id,
    }
}

/// Assigns the origin gate to the seeded flight and returns the outbox ids.
pub async fn apply_gate_change(ctx: &TestContext) -> Vec<String> {
    let outcome = ctx
        .operations
        .apply(
            ctx.flight_id,
            FlightChange::Gate {
                gate_id: Some(ctx.network.origin_gate_id),
            },
            ApplyOptions::default(),
        )
        .await
        .expect("apply gate");
    match outcome {
        ApplyOutcome::Applied(applied) => applied.notifications,
        ApplyOutcome::Unchanged { .. } => panic!("gate change should apply"),
    }
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
