//! CRUD handlers for the reference tables.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use fis_core::input::{AirlineInput, AirportInput, CodeInput, FlightStatusInput, TerminalInput};
use fis_core::types::{Airline, Airport, BaggageClaim, FlightStatus, Gate, Terminal};
use fis_core::validation::{
    validate_airline, validate_airport, validate_code, validate_status, validate_terminal,
    ValidationErrors,
};

use crate::problem::ProblemResponse;
use crate::router::AppState;

type ApiResult<T> = Result<T, ProblemResponse>;

pub async fn list_airlines(State(state): State<AppState>) -> ApiResult<Json<Vec<Airline>>> {
    let airlines = state
        .storage()
        .airlines()
        .list()
        .await
        .map_err(|err| ProblemResponse::record("airline", err))?;
    Ok(Json(airlines))
}

pub async fn get_airline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Airline>> {
    let airline = state
        .storage()
        .airlines()
        .fetch(id)
        .await
        .map_err(|err| ProblemResponse::record("airline", err))?;
    Ok(Json(airline))
}

pub async fn create_airline(
    State(state): State<AppState>,
    Json(input): Json<AirlineInput>,
) -> ApiResult<(StatusCode, Json<Airline>)> {
    let input = input.normalized();
    validate_airline(&input).map_err(ProblemResponse::validation)?;
    let airline = state
        .storage()
        .airlines()
        .insert(&input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("airline", err))?;
    Ok((StatusCode::CREATED, Json(airline)))
}

pub async fn update_airline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<AirlineInput>,
) -> ApiResult<Json<Airline>> {
    let input = input.normalized();
    validate_airline(&input).map_err(ProblemResponse::validation)?;
    let airline = state
        .storage()
        .airlines()
        .update(id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("airline", err))?;
    Ok(Json(airline))
}

pub async fn delete_airline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .storage()
        .airlines()
        .delete(id)
        .await
        .map_err(|err| ProblemResponse::record("airline", err))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_airports(State(state): State<AppState>) -> ApiResult<Json<Vec<Airport>>> {
    let airports = state
        .storage()
        .airports()
        .list()
        .await
        .map_err(|err| ProblemResponse::record("airport", err))?;
    Ok(Json(airports))
}

pub async fn get_airport(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Airport>> {
    let airport = state
        .storage()
        .airports()
        .fetch(id)
        .await
        .map_err(|err| ProblemResponse::record("airport", err))?;
    Ok(Json(airport))
}

pub async fn create_airport(
    State(state): State<AppState>,
    Json(input): Json<AirportInput>,
) -> ApiResult<(StatusCode, Json<Airport>)> {
    let input = input.normalized();
    validate_airport(&input).map_err(ProblemResponse::validation)?;
    let airport = state
        .storage()
        .airports()
        .insert(&input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("airport", err))?;
    Ok((StatusCode::CREATED, Json(airport)))
}

pub async fn update_airport(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<AirportInput>,
) -> ApiResult<Json<Airport>> {
    let input = input.normalized();
    validate_airport(&input).map_err(ProblemResponse::validation)?;
    let airport = state
        .storage()
        .airports()
        .update(id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("airport", err))?;
    Ok(Json(airport))
}

pub async fn delete_airport(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .storage()
        .airports()
        .delete(id)
        .await
        .map_err(|err| ProblemResponse::record("airport", err))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_terminals(
    State(state): State<AppState>,
    Path(airport_id): Path<i64>,
) -> ApiResult<Json<Vec<Terminal>>> {
    let storage = state.storage();
    storage
        .airports()
        .fetch(airport_id)
        .await
        .map_err(|err| ProblemResponse::record("airport", err))?;
    let terminals = storage
        .terminals()
        .list_for_airport(airport_id)
        .await
        .map_err(|err| ProblemResponse::record("terminal", err))?;
    Ok(Json(terminals))
}

pub async fn create_terminal(
    State(state): State<AppState>,
    Path(airport_id): Path<i64>,
    Json(input): Json<TerminalInput>,
) -> ApiResult<(StatusCode, Json<Terminal>)> {
    let input = input.normalized();
    validate_terminal(&input).map_err(ProblemResponse::validation)?;
    let terminal = state
        .storage()
        .terminals()
        .insert(airport_id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("terminal", err))?;
    Ok((StatusCode::CREATED, Json(terminal)))
}

pub async fn get_terminal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Terminal>> {
    let terminal = state
        .storage()
        .terminals()
        .fetch(id)
        .await
        .map_err(|err| ProblemResponse::record("terminal", err))?;
    Ok(Json(terminal))
}

pub async fn update_terminal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<TerminalInput>,
) -> ApiResult<Json<Terminal>> {
    let input = input.normalized();
    validate_terminal(&input).map_err(ProblemResponse::validation)?;
    let terminal = state
        .storage()
        .terminals()
        .update(id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("terminal", err))?;
    Ok(Json(terminal))
}

pub async fn delete_terminal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .storage()
        .terminals()
        .delete(id)
        .await
        .map_err(|err| ProblemResponse::record("terminal", err))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_terminal(state: &AppState, terminal_id: i64) -> ApiResult<()> {
    state
        .storage()
        .terminals()
        .fetch(terminal_id)
        .await
        .map(|_| ())
        .map_err(|err| ProblemResponse::record("terminal", err))
}

pub async fn list_gates(
    State(state): State<AppState>,
    Path(terminal_id): Path<i64>,
) -> ApiResult<Json<Vec<Gate>>> {
    ensure_terminal(&state, terminal_id).await?;
    let gates = state
        .storage()
        .gates()
        .list_for_terminal(terminal_id)
        .await
        .map_err(|err| ProblemResponse::record("gate", err))?;
    Ok(Json(gates))
}

pub async fn create_gate(
    State(state): State<AppState>,
    Path(terminal_id): Path<i64>,
    Json(input): Json<CodeInput>,
) -> ApiResult<(StatusCode, Json<Gate>)> {
    let input = input.normalized();
    validate_code(&input).map_err(ProblemResponse::validation)?;
    let gate = state
        .storage()
        .gates()
        .insert(terminal_id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("gate", err))?;
    Ok((StatusCode::CREATED, Json(gate)))
}

pub async fn get_gate(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Gate>> {
    let gate = state
        .storage()
        .gates()
        .fetch(id)
        .await
        .map_err(|err| ProblemResponse::record("gate", err))?;
    Ok(Json(gate))
}

pub async fn update_gate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<CodeInput>,
) -> ApiResult<Json<Gate>> {
    let input = input.normalized();
    validate_code(&input).map_err(ProblemResponse::validation)?;
    let gate = state
        .storage()
        .gates()
        .update(id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("gate", err))?;
    Ok(Json(gate))
}

pub async fn delete_gate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .storage()
        .gates()
        .delete(id)
        .await
        .map_err(|err| ProblemResponse::record("gate", err))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_baggage_claims(
    State(state): State<AppState>,
    Path(terminal_id): Path<i64>,
) -> ApiResult<Json<Vec<BaggageClaim>>> {
    ensure_terminal(&state, terminal_id).await?;
    let claims = state
        .storage()
        .baggage_claims()
        .list_for_terminal(terminal_id)
        .await
        .map_err(|err| ProblemResponse::record("baggage claim", err))?;
    Ok(Json(claims))
}

pub async fn create_baggage_claim(
    State(state): State<AppState>,
    Path(terminal_id): Path<i64>,
    Json(input): Json<CodeInput>,
) -> ApiResult<(StatusCode, Json<BaggageClaim>)> {
    let input = input.normalized();
    validate_code(&input).map_err(ProblemResponse::validation)?;
    let claim = state
        .storage()
        .baggage_claims()
        .insert(terminal_id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("baggage claim", err))?;
    Ok((StatusCode::CREATED, Json(claim)))
}

pub async fn get_baggage_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<BaggageClaim>> {
    let claim = state
        .storage()
        .baggage_claims()
        .fetch(id)
        .await
        .map_err(|err| ProblemResponse::record("baggage claim", err))?;
    Ok(Json(claim))
}

pub async fn update_baggage_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<CodeInput>,
) -> ApiResult<Json<BaggageClaim>> {
    let input = input.normalized();
    validate_code(&input).map_err(ProblemResponse::validation)?;
    let claim = state
        .storage()
        .baggage_claims()
        .update(id, &input, state.now())
        .await
        .map_err(|err| ProblemResponse::record("baggage claim", err))?;
    Ok(Json(claim))
}

pub async fn delete_baggage_claim(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state
        .storage()
        .baggage_claims()
        .delete(id)
        .await
        .map_err(|err| ProblemResponse::record("baggage claim", err))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_statuses(State(state): State<AppState>) -> ApiResult<Json<Vec<FlightStatus>>> {
    let statuses = state
        .storage()
        .flight_statuses()
        .list()
        .await
        .map_err(|err| ProblemResponse::record("status", err))?;
    Ok(Json(statuses))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<FlightStatus>> {
    let status = state
        .storage()
        .flight_statuses()
        .fetch(&code.to_ascii_uppercase())
        .await
        .map_err(|err| ProblemResponse::record("status", err))?;
    Ok(Json(status))
}

pub async fn create_status(
    State(state): State<AppState>,
    Json(input): Json<FlightStatusInput>,
) -> ApiResult<(StatusCode, Json<FlightStatus>)> {
    let input = input.normalized();
    validate_status(&input).map_err(ProblemResponse::validation)?;
    let status = state
        .storage()
        .flight_statuses()
        .insert(&input)
        .await
        .map_err(|err| ProblemResponse::record("status", err))?;
    Ok((StatusCode::CREATED, Json(status)))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<FlightStatusInput>,
) -> ApiResult<Json<FlightStatus>> {
    let code = code.to_ascii_uppercase();
    let input = input.normalized();
    validate_status(&input).map_err(ProblemResponse::validation)?;
    if input.code != code {
        let mut errors = ValidationErrors::new();
        errors.add("code", "status codes cannot be renamed");
        return Err(ProblemResponse::validation(errors));
    }
    let status = state
        .storage()
        .flight_statuses()
        .update(&code, &input)
        .await
        .map_err(|err| ProblemResponse::record("status", err))?;
    Ok(Json(status))
}

pub async fn delete_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .storage()
        .flight_statuses()
        .delete(&code.to_ascii_uppercase())
        .await
        .map_err(|err| ProblemResponse::record("status", err))?;
    Ok(StatusCode::NO_CONTENT)
}
