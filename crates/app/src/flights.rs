//! Flight records, operational changes, history and the live feed.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tracing::{error, info};

use fis_core::change::{FlightChange, TimesChange};
use fis_core::input::FlightInput;
use fis_core::types::{AuditEvent, Flight, FlightBoardEntry};
use fis_storage::{OutboxEntry, OutboxError};

use crate::feed::{feed_keep_alive, feed_stream};
use crate::operations::{ApplyOptions, ApplyOutcome};
use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

/// Header naming the operator responsible for a change.
pub const ACTOR_HEADER: &str = "x-fis-actor";

type ApiResult<T> = Result<T, ProblemResponse>;

#[derive(Debug, Serialize)]
pub struct FlightDetail {
    pub flight: Flight,
    pub board: FlightBoardEntry,
}

#[derive(Debug, Deserialize)]
pub struct FlightUpdateRequest {
    #[serde(flatten)]
    input: FlightInput,
    #[serde(default)]
    expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    code: String,
    #[serde(default)]
    expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GateRequest {
    #[serde(default)]
    gate_id: Option<i64>,
    #[serde(default)]
    expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BaggageClaimRequest {
    #[serde(default)]
    baggage_claim_id: Option<i64>,
    #[serde(default)]
    expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TimesRequest {
    #[serde(flatten)]
    times: TimesChange,
    #[serde(default)]
    expected_version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    expected_version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    flight_id: Option<i64>,
}

fn actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn options(headers: &HeaderMap, expected_version: Option<i64>) -> ApplyOptions {
    ApplyOptions {
        actor: actor(headers),
        expected_version,
    }
}

pub async fn list_flights(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<FlightBoardEntry>>> {
    let board = state
        .storage()
        .flights()
        .board()
        .await
        .map_err(|err| ProblemResponse::record("flight", err))?;
    Ok(Json(board))
}

pub async fn get_flight(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<FlightDetail>> {
    let flights = state.storage().flights();
    let flight = flights
        .fetch(id)
        .await
        .map_err(|err| ProblemResponse::record("flight", err))?;
    let board = flights
        .board_entry(id)
        .await
        .map_err(|err| ProblemResponse::record("flight", err))?;
    Ok(Json(FlightDetail { flight, board }))
}

pub async fn create_flight(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<FlightInput>,
) -> ApiResult<(StatusCode, Json<Flight>)> {
    let flight = state
        .operations()
        .create_flight(input, actor(&headers).as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(flight)))
}

pub async fn update_flight(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<FlightUpdateRequest>,
) -> ApiResult<Json<ApplyOutcome>> {
    let outcome = state
        .operations()
        .update_details(id, body.input, options(&headers, body.expected_version))
        .await?;
    Ok(Json(outcome))
}

pub async fn delete_flight(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<VersionQuery>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .operations()
        .delete_flight(id, options(&headers, query.expected_version))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<StatusRequest>,
) -> ApiResult<Json<ApplyOutcome>> {
    apply(
        &state,
        id,
        FlightChange::Status { code: body.code },
        options(&headers, body.expected_version),
    )
    .await
}

pub async fn set_gate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<GateRequest>,
) -> ApiResult<Json<ApplyOutcome>> {
    apply(
        &state,
        id,
        FlightChange::Gate {
            gate_id: body.gate_id,
        },
        options(&headers, body.expected_version),
    )
    .await
}

pub async fn set_baggage_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<BaggageClaimRequest>,
) -> ApiResult<Json<ApplyOutcome>> {
    apply(
        &state,
        id,
        FlightChange::BaggageClaim {
            baggage_claim_id: body.baggage_claim_id,
        },
        options(&headers, body.expected_version),
    )
    .await
}

pub async fn set_times(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<TimesRequest>,
) -> ApiResult<Json<ApplyOutcome>> {
    apply(
        &state,
        id,
        FlightChange::Times(body.times),
        options(&headers, body.expected_version),
    )
    .await
}

async fn apply(
    state: &AppState,
    id: i64,
    change: FlightChange,
    options: ApplyOptions,
) -> ApiResult<Json<ApplyOutcome>> {
    let outcome = state.operations().apply(id, change, options).await?;
    Ok(Json(outcome))
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<AuditEvent>>> {
    let events = state
        .storage()
        .audit_log()
        .list_for_flight(id)
        .await
        .map_err(|err| {
            error!(stage = "api", flight_id = id, error = %err, "failed to load audit history");
            internal_error()
        })?;
    if events.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::NOT_FOUND,
            "not_found",
            "flight has no recorded history",
        ));
    }
    Ok(Json(events))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<OutboxEntry>>> {
    let entries = state
        .storage()
        .outbox()
        .list_for_flight(id)
        .await
        .map_err(|err| {
            error!(stage = "api", flight_id = id, error = %err, "failed to load notifications");
            internal_error()
        })?;
    Ok(Json(entries))
}

/// Puts a failed notification back on the queue and triggers delivery.
///
/// The requeue only matches FAILED rows, so two racing retries cannot both
/// succeed; the loser gets 409.
pub async fn retry_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<OutboxEntry>)> {
    let outbox = state.storage().outbox();
    let load_failed = |err: OutboxError| {
        error!(stage = "api", outbox_id = %id, error = %err, "failed to requeue notification");
        internal_error()
    };

    let requeued = outbox.requeue(&id, state.now()).await.map_err(load_failed)?;
    let entry = outbox.fetch(&id).await.map_err(load_failed)?;
    let entry = match (requeued, entry) {
        (_, None) => {
            return Err(ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "not_found",
                "notification not found",
            ))
        }
        (false, Some(entry)) => {
            return Err(ProblemResponse::new(
                StatusCode::CONFLICT,
                "not_failed",
                format!("notification is {}", entry.status.as_str()),
            ))
        }
        (true, Some(entry)) => entry,
    };

    info!(stage = "outbox", outbox_id = %id, partner = %entry.partner, "notification requeued");
    state.dispatcher().notify(vec![id]);
    Ok((StatusCode::ACCEPTED, Json(entry)))
}

pub async fn live_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Sse<impl Stream<Item = Result<Event, serde_json::Error>>> {
    let stream = feed_stream(state.feed().clone(), query.flight_id);
    Sse::new(stream).keep_alive(feed_keep_alive())
}
