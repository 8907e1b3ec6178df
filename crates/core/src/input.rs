use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;

/// Create/update payload for airlines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AirlineInput {
    pub iata_code: String,
    #[serde(default)]
    pub icao_code: Option<String>,
    pub name: String,
}

impl AirlineInput {
    /// Trims whitespace and upper-cases the carrier codes.
    pub fn normalized(self) -> Self {
        Self {
            iata_code: code(&self.iata_code),
            icao_code: self
                .icao_code
                .map(|value| code(&value))
                .filter(|value| !value.is_empty()),
            name: self.name.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AirportInput {
    pub iata_code: String,
    pub name: String,
    pub city: String,
    pub country: String,
    pub timezone: String,
}

impl AirportInput {
    pub fn normalized(self) -> Self {
        Self {
            iata_code: code(&self.iata_code),
            name: self.name.trim().to_string(),
            city: self.city.trim().to_string(),
            country: code(&self.country),
            timezone: self.timezone.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TerminalInput {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl TerminalInput {
    pub fn normalized(self) -> Self {
        Self {
            code: code(&self.code),
            name: self
                .name
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }
}

/// Payload shared by gates and baggage claims, which only carry a code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodeInput {
    pub code: String,
}

impl CodeInput {
    pub fn normalized(self) -> Self {
        Self {
            code: code(&self.code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlightStatusInput {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub is_final: bool,
}

impl FlightStatusInput {
    pub fn normalized(self) -> Self {
        Self {
            code: code(&self.code),
            description: self.description.trim().to_string(),
            is_final: self.is_final,
        }
    }
}

/// Schedule-level flight attributes. Operational fields (status, gate,
/// baggage claim, estimated/actual times) change through flight operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlightInput {
    pub airline_id: i64,
    pub flight_number: String,
    pub origin_airport_id: i64,
    pub destination_airport_id: i64,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    #[serde(default)]
    pub status_code: Option<String>,
}

impl FlightInput {
    pub fn normalized(self) -> Self {
        Self {
            flight_number: code(&self.flight_number),
            scheduled_departure: self.scheduled_departure.trunc_subsecs(3),
            scheduled_arrival: self.scheduled_arrival.trunc_subsecs(3),
            status_code: self
                .status_code
                .map(|value| code(&value))
                .filter(|value| !value.is_empty()),
            ..self
        }
    }
}

fn code(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}
