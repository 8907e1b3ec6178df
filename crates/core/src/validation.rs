use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;

use crate::input::{
    AirlineInput, AirportInput, CodeInput, FlightInput, FlightStatusInput, TerminalInput,
};

const MAX_NAME_LEN: usize = 120;

/// Field-level validation failures, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("validation failed for {} field(s)", .fields.len())]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    /// Converts the collected failures into a `Result`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

pub fn validate_airline(input: &AirlineInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if input.iata_code.len() != 2 || !input.iata_code.chars().all(is_upper_alnum) {
        errors.add("iata_code", "must be 2 letters or digits");
    }
    if let Some(icao) = &input.icao_code {
        if icao.len() != 3 || !icao.chars().all(|c| c.is_ascii_uppercase()) {
            errors.add("icao_code", "must be 3 letters");
        }
    }
    check_name(&mut errors, "name", &input.name);
    errors.into_result()
}

pub fn validate_airport(input: &AirportInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if input.iata_code.len() != 3 || !input.iata_code.chars().all(|c| c.is_ascii_uppercase()) {
        errors.add("iata_code", "must be 3 letters");
    }
    check_name(&mut errors, "name", &input.name);
    check_name(&mut errors, "city", &input.city);
    if input.country.len() != 2 || !input.country.chars().all(|c| c.is_ascii_uppercase()) {
        errors.add("country", "must be an ISO 3166 alpha-2 code");
    }
    if input.timezone.parse::<Tz>().is_err() {
        errors.add("timezone", "must be an IANA time zone name");
    }
    errors.into_result()
}

pub fn validate_terminal(input: &TerminalInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_code(&mut errors, "code", &input.code);
    if let Some(name) = &input.name {
        check_name(&mut errors, "name", name);
    }
    errors.into_result()
}

/// Validates gate and baggage claim codes.
pub fn validate_code(input: &CodeInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_code(&mut errors, "code", &input.code);
    errors.into_result()
}

pub fn validate_status(input: &FlightStatusInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if !(2..=4).contains(&input.code.len()) || !input.code.chars().all(|c| c.is_ascii_uppercase())
    {
        errors.add("code", "must be 2 to 4 letters");
    }
    check_name(&mut errors, "description", &input.description);
    errors.into_result()
}

pub fn validate_flight(input: &FlightInput) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if !is_flight_number(&input.flight_number) {
        errors.add("flight_number", "must be 1 to 4 digits, optionally followed by a letter");
    }
    if input.origin_airport_id == input.destination_airport_id {
        errors.add("destination_airport_id", "must differ from the origin airport");
    }
    if input.scheduled_arrival <= input.scheduled_departure {
        errors.add("scheduled_arrival", "must be after the scheduled departure");
    }
    errors.into_result()
}

fn check_name(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.is_empty() {
        errors.add(field, "is required");
    } else if value.chars().count() > MAX_NAME_LEN {
        errors.add(field, format!("must be at most {MAX_NAME_LEN} characters"));
    }
}

fn check_code(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.is_empty() || value.len() > 8 {
        errors.add(field, "must be 1 to 8 characters");
    } else if !value.chars().all(|c| is_upper_alnum(c) || c == '-') {
        errors.add(field, "may only contain letters, digits and '-'");
    }
}

fn is_upper_alnum(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit()
}

fn is_flight_number(value: &str) -> bool {
    let digits = value.chars().take_while(char::is_ascii_digit).count();
    let suffix = &value[digits..];
    (1..=4).contains(&digits)
        && (suffix.is_empty()
            || (suffix.len() == 1 && suffix.chars().all(|c| c.is_ascii_uppercase())))
}
