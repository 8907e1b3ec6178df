use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airline {
    pub id: i64,
    pub iata_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icao_code: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Airport served by the FIS. `timezone` is an IANA zone name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airport {
    pub id: i64,
    pub iata_code: String,
    pub name: String,
    pub city: String,
    pub country: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    pub id: i64,
    pub airport_id: i64,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    pub id: i64,
    pub terminal_id: i64,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaggageClaim {
    pub id: i64,
    pub terminal_id: i64,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entry of the status code table. Final statuses (arrived, cancelled, ...)
/// end the operational life of a flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightStatus {
    pub code: String,
    pub description: String,
    pub is_final: bool,
}

/// Status assigned to flights created without an explicit status.
pub const DEFAULT_STATUS_CODE: &str = "SCH";

/// Authoritative flight record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub id: i64,
    pub airline_id: i64,
    pub flight_number: String,
    pub origin_airport_id: i64,
    pub destination_airport_id: i64,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub estimated_departure: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub status_code: String,
    pub gate_id: Option<i64>,
    pub baggage_claim_id: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flight joined with the codes and labels operators and partners read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightBoardEntry {
    pub id: i64,
    pub airline_iata: String,
    pub flight_number: String,
    pub designator: String,
    pub origin_iata: String,
    pub destination_iata: String,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub estimated_departure: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub status_code: String,
    pub status_description: String,
    pub gate: Option<String>,
    pub departure_terminal: Option<String>,
    pub baggage_claim: Option<String>,
    pub version: i64,
}

/// Kind of change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Details,
    Status,
    Gate,
    BaggageClaim,
    Times,
    Deleted,
}

impl ChangeType {
    /// Returns the canonical database and metrics representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Details => "details",
            Self::Status => "status",
            Self::Gate => "gate",
            Self::BaggageClaim => "baggage_claim",
            Self::Times => "times",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "details" => Some(Self::Details),
            "status" => Some(Self::Status),
            "gate" => Some(Self::Gate),
            "baggage_claim" => Some(Self::BaggageClaim),
            "times" => Some(Self::Times),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field transition. Values are rendered as strings so the audit
/// log stays readable regardless of the column type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Immutable audit log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub flight_id: i64,
    pub change_type: ChangeType,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Downstream integration partner receiving flight updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partner {
    PassengerMessaging,
    BaggageHandling,
}

impl Partner {
    pub const ALL: [Partner; 2] = [Partner::PassengerMessaging, Partner::BaggageHandling];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PassengerMessaging => "passenger_messaging",
            Self::BaggageHandling => "baggage_handling",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "passenger_messaging" => Some(Self::PassengerMessaging),
            "baggage_handling" => Some(Self::BaggageHandling),
            _ => None,
        }
    }

    /// Returns `true` when the partner subscribes to changes of the given kind.
    ///
    /// Passengers hear about everything operational; baggage handling only
    /// cares about status (cancellations, arrivals) and carousel assignment.
    pub fn interested_in(self, change_type: ChangeType) -> bool {
        match self {
            Self::PassengerMessaging => matches!(
                change_type,
                ChangeType::Status | ChangeType::Gate | ChangeType::BaggageClaim | ChangeType::Times
            ),
            Self::BaggageHandling => {
                matches!(change_type, ChangeType::Status | ChangeType::BaggageClaim)
            }
        }
    }
}

impl fmt::Display for Partner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload pushed to partners and to live feed subscribers after a change
/// has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightNotification {
    pub event_id: String,
    pub change_type: ChangeType,
    pub changes: Vec<FieldChange>,
    pub flight: FlightBoardEntry,
    pub occurred_at: DateTime<Utc>,
}

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "DELIVERED" => Some(Self::Delivered),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}
