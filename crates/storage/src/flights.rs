use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};

use fis_core::types::{Flight, FlightBoardEntry};

use crate::{classify, to_rfc3339, RecordError, WriteKind};

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: i64,
    airline_id: i64,
    flight_number: String,
    origin_airport_id: i64,
    destination_airport_id: i64,
    scheduled_departure: DateTime<Utc>,
    scheduled_arrival: DateTime<Utc>,
    estimated_departure: Option<DateTime<Utc>>,
    estimated_arrival: Option<DateTime<Utc>>,
    actual_departure: Option<DateTime<Utc>>,
    actual_arrival: Option<DateTime<Utc>>,
    status_code: String,
    gate_id: Option<i64>,
    baggage_claim_id: Option<i64>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FlightRow> for Flight {
    fn from(row: FlightRow) -> Self {
        Self {
            id: row.id,
            airline_id: row.airline_id,
            flight_number: row.flight_number,
            origin_airport_id: row.origin_airport_id,
            destination_airport_id: row.destination_airport_id,
            scheduled_departure: row.scheduled_departure,
            scheduled_arrival: row.scheduled_arrival,
            estimated_departure: row.estimated_departure,
            estimated_arrival: row.estimated_arrival,
            actual_departure: row.actual_departure,
            actual_arrival: row.actual_arrival,
            status_code: row.status_code,
            gate_id: row.gate_id,
            baggage_claim_id: row.baggage_claim_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BoardRow {
    id: i64,
    airline_iata: String,
    flight_number: String,
    origin_iata: String,
    destination_iata: String,
    scheduled_departure: DateTime<Utc>,
    scheduled_arrival: DateTime<Utc>,
    estimated_departure: Option<DateTime<Utc>>,
    estimated_arrival: Option<DateTime<Utc>>,
    actual_departure: Option<DateTime<Utc>>,
    actual_arrival: Option<DateTime<Utc>>,
    status_code: String,
    status_description: String,
    gate: Option<String>,
    departure_terminal: Option<String>,
    baggage_claim: Option<String>,
    version: i64,
}

impl From<BoardRow> for FlightBoardEntry {
    fn from(row: BoardRow) -> Self {
        Self {
            designator: format!("{}{}", row.airline_iata, row.flight_number),
            id: row.id,
            airline_iata: row.airline_iata,
            flight_number: row.flight_number,
            origin_iata: row.origin_iata,
            destination_iata: row.destination_iata,
            scheduled_departure: row.scheduled_departure,
            scheduled_arrival: row.scheduled_arrival,
            estimated_departure: row.estimated_departure,
            estimated_arrival: row.estimated_arrival,
            actual_departure: row.actual_departure,
            actual_arrival: row.actual_arrival,
            status_code: row.status_code,
            status_description: row.status_description,
            gate: row.gate,
            departure_terminal: row.departure_terminal,
            baggage_claim: row.baggage_claim,
            version: row.version,
        }
    }
}

const BOARD_SELECT: &str = r#"
SELECT f.id,
       a.iata_code AS airline_iata,
       f.flight_number,
       o.iata_code AS origin_iata,
       d.iata_code AS destination_iata,
       f.scheduled_departure,
       f.scheduled_arrival,
       f.estimated_departure,
       f.estimated_arrival,
       f.actual_departure,
       f.actual_arrival,
       f.status_code,
       s.description AS status_description,
       g.code AS gate,
       t.code AS departure_terminal,
       b.code AS baggage_claim,
       f.version
  FROM flights AS f
  JOIN airlines AS a ON a.id = f.airline_id
  JOIN airports AS o ON o.id = f.origin_airport_id
  JOIN airports AS d ON d.id = f.destination_airport_id
  JOIN flight_statuses AS s ON s.code = f.status_code
  LEFT JOIN gates AS g ON g.id = f.gate_id
  LEFT JOIN terminals AS t ON t.id = g.terminal_id
  LEFT JOIN baggage_claims AS b ON b.id = f.baggage_claim_id
"#;

/// Schedule attributes of a flight about to be created.
#[derive(Debug, Clone)]
pub struct NewFlight {
    pub airline_id: i64,
    pub flight_number: String,
    pub origin_airport_id: i64,
    pub destination_airport_id: i64,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub status_code: String,
}

/// Repository for the authoritative `flights` table.
#[derive(Clone)]
pub struct FlightRepository {
    pool: SqlitePool,
}

impl FlightRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Flight>, RecordError> {
        let rows = sqlx::query_as::<_, FlightRow>(
            "SELECT * FROM flights ORDER BY scheduled_departure, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Flight::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Flight, RecordError> {
        fetch_flight(&self.pool, id).await
    }

    /// Loads a flight inside the caller's transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Flight, RecordError> {
        fetch_flight(&mut **tx, id).await
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        flight: &NewFlight,
        now: DateTime<Utc>,
    ) -> Result<Flight, RecordError> {
        let row = sqlx::query_as::<_, FlightRow>(
            "INSERT INTO flights \
             (airline_id, flight_number, origin_airport_id, destination_airport_id, \
              scheduled_departure, scheduled_arrival, status_code, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?) RETURNING *",
        )
        .bind(flight.airline_id)
        .bind(&flight.flight_number)
        .bind(flight.origin_airport_id)
        .bind(flight.destination_airport_id)
        .bind(to_rfc3339(flight.scheduled_departure))
        .bind(to_rfc3339(flight.scheduled_arrival))
        .bind(&flight.status_code)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    /// Writes `next` over the stored record and bumps its version.
    ///
    /// The update only matches when the stored version still equals
    /// `next.version`; otherwise [`RecordError::Conflict`] is returned.
    pub async fn apply(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        next: &Flight,
        now: DateTime<Utc>,
    ) -> Result<Flight, RecordError> {
        let row = sqlx::query_as::<_, FlightRow>(
            "UPDATE flights SET \
                airline_id = ?, flight_number = ?, origin_airport_id = ?, destination_airport_id = ?, \
                scheduled_departure = ?, scheduled_arrival = ?, \
                estimated_departure = ?, estimated_arrival = ?, actual_departure = ?, actual_arrival = ?, \
                status_code = ?, gate_id = ?, baggage_claim_id = ?, \
                version = version + 1, updated_at = ? \
             WHERE id = ? AND version = ? \
             RETURNING *",
        )
        .bind(next.airline_id)
        .bind(&next.flight_number)
        .bind(next.origin_airport_id)
        .bind(next.destination_airport_id)
        .bind(to_rfc3339(next.scheduled_departure))
        .bind(to_rfc3339(next.scheduled_arrival))
        .bind(next.estimated_departure.map(to_rfc3339))
        .bind(next.estimated_arrival.map(to_rfc3339))
        .bind(next.actual_departure.map(to_rfc3339))
        .bind(next.actual_arrival.map(to_rfc3339))
        .bind(&next.status_code)
        .bind(next.gate_id)
        .bind(next.baggage_claim_id)
        .bind(to_rfc3339(now))
        .bind(next.id)
        .bind(next.version)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Flight::from).ok_or(RecordError::Conflict)
    }

    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), RecordError> {
        let result = sqlx::query("DELETE FROM flights WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|err| classify(err, WriteKind::Delete))?;
        if result.rows_affected() == 0 {
            return Err(RecordError::NotFound);
        }
        Ok(())
    }

    /// Lists the enriched board rows ordered by scheduled departure.
    pub async fn board(&self) -> Result<Vec<FlightBoardEntry>, RecordError> {
        let sql = format!("{BOARD_SELECT} ORDER BY f.scheduled_departure, f.id");
        let rows = sqlx::query_as::<_, BoardRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(FlightBoardEntry::from).collect())
    }

    pub async fn board_entry(&self, id: i64) -> Result<FlightBoardEntry, RecordError> {
        fetch_board_entry(&self.pool, id).await
    }

    /// Loads the enriched row inside the caller's transaction, so it reflects
    /// uncommitted changes.
    pub async fn board_entry_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<FlightBoardEntry, RecordError> {
        fetch_board_entry(&mut **tx, id).await
    }
}

async fn fetch_flight<'e, E>(executor: E, id: i64) -> Result<Flight, RecordError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, FlightRow>("SELECT * FROM flights WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(Flight::from)
        .ok_or(RecordError::NotFound)
}

async fn fetch_board_entry<'e, E>(executor: E, id: i64) -> Result<FlightBoardEntry, RecordError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{BOARD_SELECT} WHERE f.id = ?");
    sqlx::query_as::<_, BoardRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(FlightBoardEntry::from)
        .ok_or(RecordError::NotFound)
}
