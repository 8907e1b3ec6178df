use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::input::FlightInput;
use crate::types::{ChangeType, FieldChange, Flight};

/// Operational change an operator proposes for a flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlightChange {
    Status { code: String },
    Gate { gate_id: Option<i64> },
    BaggageClaim { baggage_claim_id: Option<i64> },
    Times(TimesChange),
}

impl FlightChange {
    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::Status { .. } => ChangeType::Status,
            Self::Gate { .. } => ChangeType::Gate,
            Self::BaggageClaim { .. } => ChangeType::BaggageClaim,
            Self::Times(_) => ChangeType::Times,
        }
    }

    /// Upper-cases status codes and truncates times to the millisecond
    /// precision the store keeps, so re-applying a stored value is a no-op.
    pub fn normalized(self) -> Self {
        match self {
            Self::Status { code } => Self::Status {
                code: code.trim().to_ascii_uppercase(),
            },
            Self::Times(times) => Self::Times(TimesChange {
                estimated_departure: times.estimated_departure.map(|t| t.trunc_subsecs(3)),
                estimated_arrival: times.estimated_arrival.map(|t| t.trunc_subsecs(3)),
                actual_departure: times.actual_departure.map(|t| t.trunc_subsecs(3)),
                actual_arrival: times.actual_arrival.map(|t| t.trunc_subsecs(3)),
            }),
            other => other,
        }
    }
}

/// Estimated/actual time updates. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimesChange {
    #[serde(default)]
    pub estimated_departure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_arrival: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_departure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_arrival: Option<DateTime<Utc>>,
}

impl TimesChange {
    pub fn is_empty(&self) -> bool {
        self.estimated_departure.is_none()
            && self.estimated_arrival.is_none()
            && self.actual_departure.is_none()
            && self.actual_arrival.is_none()
    }
}

/// Result of diffing a proposed change against the current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    pub change_type: ChangeType,
    pub changes: Vec<FieldChange>,
    /// The record as it looks once the plan is applied. `version` and
    /// `updated_at` are left for storage to bump.
    pub next: Flight,
}

impl ChangePlan {
    /// An empty plan means the change is already in effect.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Computes the field transitions needed to apply `change` to `current`.
pub fn plan_change(current: &Flight, change: &FlightChange) -> ChangePlan {
    let mut next = current.clone();
    let mut changes = Vec::new();

    match change {
        FlightChange::Status { code } => {
            diff(&mut changes, "status_code", &current.status_code, code, |v| {
                Some(v.clone())
            });
            next.status_code = code.clone();
        }
        FlightChange::Gate { gate_id } => {
            diff(&mut changes, "gate_id", &current.gate_id, gate_id, render_id);
            next.gate_id = *gate_id;
        }
        FlightChange::BaggageClaim { baggage_claim_id } => {
            diff(
                &mut changes,
                "baggage_claim_id",
                &current.baggage_claim_id,
                baggage_claim_id,
                render_id,
            );
            next.baggage_claim_id = *baggage_claim_id;
        }
        FlightChange::Times(times) => {
            apply_time(
                &mut changes,
                "estimated_departure",
                &mut next.estimated_departure,
                times.estimated_departure,
            );
            apply_time(
                &mut changes,
                "estimated_arrival",
                &mut next.estimated_arrival,
                times.estimated_arrival,
            );
            apply_time(
                &mut changes,
                "actual_departure",
                &mut next.actual_departure,
                times.actual_departure,
            );
            apply_time(
                &mut changes,
                "actual_arrival",
                &mut next.actual_arrival,
                times.actual_arrival,
            );
        }
    }

    ChangePlan {
        change_type: change.change_type(),
        changes,
        next,
    }
}

/// Computes the schedule-level transitions of an administrative edit.
pub fn plan_details(current: &Flight, input: &FlightInput) -> ChangePlan {
    let mut changes = Vec::new();
    let render = |v: &i64| Some(v.to_string());

    diff(&mut changes, "airline_id", &current.airline_id, &input.airline_id, render);
    diff(
        &mut changes,
        "flight_number",
        &current.flight_number,
        &input.flight_number,
        |v| Some(v.clone()),
    );
    diff(
        &mut changes,
        "origin_airport_id",
        &current.origin_airport_id,
        &input.origin_airport_id,
        render,
    );
    diff(
        &mut changes,
        "destination_airport_id",
        &current.destination_airport_id,
        &input.destination_airport_id,
        render,
    );
    diff(
        &mut changes,
        "scheduled_departure",
        &current.scheduled_departure,
        &input.scheduled_departure,
        |v| Some(render_time(*v)),
    );
    diff(
        &mut changes,
        "scheduled_arrival",
        &current.scheduled_arrival,
        &input.scheduled_arrival,
        |v| Some(render_time(*v)),
    );

    let next = Flight {
        airline_id: input.airline_id,
        flight_number: input.flight_number.clone(),
        origin_airport_id: input.origin_airport_id,
        destination_airport_id: input.destination_airport_id,
        scheduled_departure: input.scheduled_departure,
        scheduled_arrival: input.scheduled_arrival,
        ..current.clone()
    };

    ChangePlan {
        change_type: ChangeType::Details,
        changes,
        next,
    }
}

/// Canonical rendering of timestamps in audit rows and payloads. Uses the
/// same millisecond precision the store keeps.
pub fn render_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn diff<T: PartialEq>(
    changes: &mut Vec<FieldChange>,
    field: &str,
    old: &T,
    new: &T,
    render: impl Fn(&T) -> Option<String>,
) {
    if old != new {
        changes.push(FieldChange {
            field: field.to_string(),
            old_value: render(old),
            new_value: render(new),
        });
    }
}

fn render_id(value: &Option<i64>) -> Option<String> {
    value.map(|id| id.to_string())
}

fn apply_time(
    changes: &mut Vec<FieldChange>,
    field: &str,
    slot: &mut Option<DateTime<Utc>>,
    proposed: Option<DateTime<Utc>>,
) {
    let Some(value) = proposed else {
        return;
    };
    if *slot != Some(value) {
        changes.push(FieldChange {
            field: field.to_string(),
            old_value: slot.map(render_time),
            new_value: Some(render_time(value)),
        });
        *slot = Some(value);
    }
}
