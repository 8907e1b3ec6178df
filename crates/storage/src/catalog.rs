//! Reference tables: airlines, airports, terminals, gates, baggage claims and
//! status codes.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

use fis_core::input::{AirlineInput, AirportInput, CodeInput, FlightStatusInput, TerminalInput};
use fis_core::types::{Airline, Airport, BaggageClaim, FlightStatus, Gate, Terminal};

use crate::{classify, to_rfc3339, RecordError, WriteKind};

#[derive(sqlx::FromRow)]
struct AirlineRow {
    id: i64,
    iata_code: String,
    icao_code: Option<String>,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AirlineRow> for Airline {
    fn from(row: AirlineRow) -> Self {
        Self {
            id: row.id,
            iata_code: row.iata_code,
            icao_code: row.icao_code,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the `airlines` table.
#[derive(Clone)]
pub struct AirlineRepository {
    pool: SqlitePool,
}

impl AirlineRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Airline>, RecordError> {
        let rows = sqlx::query_as::<_, AirlineRow>("SELECT * FROM airlines ORDER BY iata_code")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Airline::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Airline, RecordError> {
        sqlx::query_as::<_, AirlineRow>("SELECT * FROM airlines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Airline::from)
            .ok_or(RecordError::NotFound)
    }

    pub async fn insert(
        &self,
        input: &AirlineInput,
        now: DateTime<Utc>,
    ) -> Result<Airline, RecordError> {
        let row = sqlx::query_as::<_, AirlineRow>(
            "INSERT INTO airlines (iata_code, icao_code, name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&input.iata_code)
        .bind(&input.icao_code)
        .bind(&input.name)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update(
        &self,
        id: i64,
        input: &AirlineInput,
        now: DateTime<Utc>,
    ) -> Result<Airline, RecordError> {
        sqlx::query_as::<_, AirlineRow>(
            "UPDATE airlines SET iata_code = ?, icao_code = ?, name = ?, updated_at = ? \
             WHERE id = ? RETURNING *",
        )
        .bind(&input.iata_code)
        .bind(&input.icao_code)
        .bind(&input.name)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Airline::from)
        .ok_or(RecordError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RecordError> {
        delete_by_id(&self.pool, "DELETE FROM airlines WHERE id = ?", id).await
    }
}

#[derive(sqlx::FromRow)]
struct AirportRow {
    id: i64,
    iata_code: String,
    name: String,
    city: String,
    country: String,
    timezone: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AirportRow> for Airport {
    fn from(row: AirportRow) -> Self {
        Self {
            id: row.id,
            iata_code: row.iata_code,
            name: row.name,
            city: row.city,
            country: row.country,
            timezone: row.timezone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the `airports` table.
#[derive(Clone)]
pub struct AirportRepository {
    pool: SqlitePool,
}

impl AirportRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Airport>, RecordError> {
        let rows = sqlx::query_as::<_, AirportRow>("SELECT * FROM airports ORDER BY iata_code")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Airport::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Airport, RecordError> {
        sqlx::query_as::<_, AirportRow>("SELECT * FROM airports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Airport::from)
            .ok_or(RecordError::NotFound)
    }

    pub async fn insert(
        &self,
        input: &AirportInput,
        now: DateTime<Utc>,
    ) -> Result<Airport, RecordError> {
        let row = sqlx::query_as::<_, AirportRow>(
            "INSERT INTO airports (iata_code, name, city, country, timezone, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&input.iata_code)
        .bind(&input.name)
        .bind(&input.city)
        .bind(&input.country)
        .bind(&input.timezone)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update(
        &self,
        id: i64,
        input: &AirportInput,
        now: DateTime<Utc>,
    ) -> Result<Airport, RecordError> {
        sqlx::query_as::<_, AirportRow>(
            "UPDATE airports SET iata_code = ?, name = ?, city = ?, country = ?, timezone = ?, \
             updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&input.iata_code)
        .bind(&input.name)
        .bind(&input.city)
        .bind(&input.country)
        .bind(&input.timezone)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Airport::from)
        .ok_or(RecordError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RecordError> {
        delete_by_id(&self.pool, "DELETE FROM airports WHERE id = ?", id).await
    }
}

#[derive(sqlx::FromRow)]
struct TerminalRow {
    id: i64,
    airport_id: i64,
    code: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TerminalRow> for Terminal {
    fn from(row: TerminalRow) -> Self {
        Self {
            id: row.id,
            airport_id: row.airport_id,
            code: row.code,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the `terminals` table.
#[derive(Clone)]
pub struct TerminalRepository {
    pool: SqlitePool,
}

impl TerminalRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_for_airport(&self, airport_id: i64) -> Result<Vec<Terminal>, RecordError> {
        let rows = sqlx::query_as::<_, TerminalRow>(
            "SELECT * FROM terminals WHERE airport_id = ? ORDER BY code",
        )
        .bind(airport_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Terminal::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Terminal, RecordError> {
        sqlx::query_as::<_, TerminalRow>("SELECT * FROM terminals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Terminal::from)
            .ok_or(RecordError::NotFound)
    }

    pub async fn insert(
        &self,
        airport_id: i64,
        input: &TerminalInput,
        now: DateTime<Utc>,
    ) -> Result<Terminal, RecordError> {
        let row = sqlx::query_as::<_, TerminalRow>(
            "INSERT INTO terminals (airport_id, code, name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(airport_id)
        .bind(&input.code)
        .bind(&input.name)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update(
        &self,
        id: i64,
        input: &TerminalInput,
        now: DateTime<Utc>,
    ) -> Result<Terminal, RecordError> {
        sqlx::query_as::<_, TerminalRow>(
            "UPDATE terminals SET code = ?, name = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&input.code)
        .bind(&input.name)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Terminal::from)
        .ok_or(RecordError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RecordError> {
        delete_by_id(&self.pool, "DELETE FROM terminals WHERE id = ?", id).await
    }
}

/// Row shape shared by gates and baggage claims.
#[derive(sqlx::FromRow)]
struct PositionRow {
    id: i64,
    terminal_id: i64,
    code: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PositionRow> for Gate {
    fn from(row: PositionRow) -> Self {
        Self {
            id: row.id,
            terminal_id: row.terminal_id,
            code: row.code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<PositionRow> for BaggageClaim {
    fn from(row: PositionRow) -> Self {
        Self {
            id: row.id,
            terminal_id: row.terminal_id,
            code: row.code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the `gates` table.
#[derive(Clone)]
pub struct GateRepository {
    pool: SqlitePool,
}

impl GateRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_for_terminal(&self, terminal_id: i64) -> Result<Vec<Gate>, RecordError> {
        let rows =
            sqlx::query_as::<_, PositionRow>("SELECT * FROM gates WHERE terminal_id = ? ORDER BY code")
                .bind(terminal_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Gate::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<Gate, RecordError> {
        sqlx::query_as::<_, PositionRow>("SELECT * FROM gates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Gate::from)
            .ok_or(RecordError::NotFound)
    }

    pub async fn insert(
        &self,
        terminal_id: i64,
        input: &CodeInput,
        now: DateTime<Utc>,
    ) -> Result<Gate, RecordError> {
        let row = sqlx::query_as::<_, PositionRow>(
            "INSERT INTO gates (terminal_id, code, created_at, updated_at) \
             VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(terminal_id)
        .bind(&input.code)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update(
        &self,
        id: i64,
        input: &CodeInput,
        now: DateTime<Utc>,
    ) -> Result<Gate, RecordError> {
        sqlx::query_as::<_, PositionRow>(
            "UPDATE gates SET code = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&input.code)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Gate::from)
        .ok_or(RecordError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RecordError> {
        delete_by_id(&self.pool, "DELETE FROM gates WHERE id = ?", id).await
    }

    /// Resolves the airport a gate belongs to, inside the caller's transaction.
    pub async fn airport_of(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        gate_id: i64,
    ) -> Result<Option<i64>, RecordError> {
        let airport: Option<(i64,)> = sqlx::query_as(
            "SELECT t.airport_id FROM gates AS g JOIN terminals AS t ON t.id = g.terminal_id \
             WHERE g.id = ?",
        )
        .bind(gate_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(airport.map(|row| row.0))
    }
}

/// Repository for the `baggage_claims` table.
#[derive(Clone)]
pub struct BaggageClaimRepository {
    pool: SqlitePool,
}

impl BaggageClaimRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_for_terminal(
        &self,
        terminal_id: i64,
    ) -> Result<Vec<BaggageClaim>, RecordError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM baggage_claims WHERE terminal_id = ? ORDER BY code",
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BaggageClaim::from).collect())
    }

    pub async fn fetch(&self, id: i64) -> Result<BaggageClaim, RecordError> {
        sqlx::query_as::<_, PositionRow>("SELECT * FROM baggage_claims WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(BaggageClaim::from)
            .ok_or(RecordError::NotFound)
    }

    pub async fn insert(
        &self,
        terminal_id: i64,
        input: &CodeInput,
        now: DateTime<Utc>,
    ) -> Result<BaggageClaim, RecordError> {
        let row = sqlx::query_as::<_, PositionRow>(
            "INSERT INTO baggage_claims (terminal_id, code, created_at, updated_at) \
             VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(terminal_id)
        .bind(&input.code)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update(
        &self,
        id: i64,
        input: &CodeInput,
        now: DateTime<Utc>,
    ) -> Result<BaggageClaim, RecordError> {
        sqlx::query_as::<_, PositionRow>(
            "UPDATE baggage_claims SET code = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(&input.code)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(BaggageClaim::from)
        .ok_or(RecordError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RecordError> {
        delete_by_id(&self.pool, "DELETE FROM baggage_claims WHERE id = ?", id).await
    }

    /// Resolves the airport a baggage claim belongs to, inside the caller's transaction.
    pub async fn airport_of(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        claim_id: i64,
    ) -> Result<Option<i64>, RecordError> {
        let airport: Option<(i64,)> = sqlx::query_as(
            "SELECT t.airport_id FROM baggage_claims AS b JOIN terminals AS t ON t.id = b.terminal_id \
             WHERE b.id = ?",
        )
        .bind(claim_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(airport.map(|row| row.0))
    }
}

#[derive(sqlx::FromRow)]
struct FlightStatusRow {
    code: String,
    description: String,
    is_final: i64,
}

impl From<FlightStatusRow> for FlightStatus {
    fn from(row: FlightStatusRow) -> Self {
        Self {
            code: row.code,
            description: row.description,
            is_final: row.is_final != 0,
        }
    }
}

/// Repository for the `flight_statuses` code table.
#[derive(Clone)]
pub struct FlightStatusRepository {
    pool: SqlitePool,
}

impl FlightStatusRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<FlightStatus>, RecordError> {
        let rows = sqlx::query_as::<_, FlightStatusRow>(
            "SELECT code, description, is_final FROM flight_statuses ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FlightStatus::from).collect())
    }

    pub async fn fetch(&self, code: &str) -> Result<FlightStatus, RecordError> {
        sqlx::query_as::<_, FlightStatusRow>(
            "SELECT code, description, is_final FROM flight_statuses WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .map(FlightStatus::from)
        .ok_or(RecordError::NotFound)
    }

    /// Looks a status up inside the caller's transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        code: &str,
    ) -> Result<Option<FlightStatus>, RecordError> {
        let row = sqlx::query_as::<_, FlightStatusRow>(
            "SELECT code, description, is_final FROM flight_statuses WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(FlightStatus::from))
    }

    pub async fn insert(&self, input: &FlightStatusInput) -> Result<FlightStatus, RecordError> {
        let row = sqlx::query_as::<_, FlightStatusRow>(
            "INSERT INTO flight_statuses (code, description, is_final) VALUES (?, ?, ?) \
             RETURNING code, description, is_final",
        )
        .bind(&input.code)
        .bind(&input.description)
        .bind(i64::from(input.is_final))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Updates description and finality. The code itself is the key and
    /// cannot be renamed while flights reference it.
    pub async fn update(
        &self,
        code: &str,
        input: &FlightStatusInput,
    ) -> Result<FlightStatus, RecordError> {
        sqlx::query_as::<_, FlightStatusRow>(
            "UPDATE flight_statuses SET description = ?, is_final = ? WHERE code = ? \
             RETURNING code, description, is_final",
        )
        .bind(&input.description)
        .bind(i64::from(input.is_final))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .map(FlightStatus::from)
        .ok_or(RecordError::NotFound)
    }

    pub async fn delete(&self, code: &str) -> Result<(), RecordError> {
        let result = sqlx::query("DELETE FROM flight_statuses WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(|err| classify(err, WriteKind::Delete))?;
        if result.rows_affected() == 0 {
            return Err(RecordError::NotFound);
        }
        Ok(())
    }
}

async fn delete_by_id(pool: &SqlitePool, sql: &str, id: i64) -> Result<(), RecordError> {
    let result = sqlx::query(sql)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|err| classify(err, WriteKind::Delete))?;
    if result.rows_affected() == 0 {
        return Err(RecordError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fis_core::input::{AirlineInput, CodeInput, FlightStatusInput};

    use crate::testing::{new_flight, seed_network, setup_db};
    use crate::RecordError;

    #[tokio::test]
    async fn duplicate_airline_code_is_reported() {
        let (db, _dir) = setup_db().await;
        let input = AirlineInput {
            iata_code: "LH".to_string(),
            icao_code: None,
            name: "Lufthansa".to_string(),
        };
        db.airlines().insert(&input, Utc::now()).await.expect("insert");
        let err = db.airlines().insert(&input, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RecordError::Duplicate));
    }

    #[tokio::test]
    async fn gate_under_missing_terminal_is_a_missing_reference() {
        let (db, _dir) = setup_db().await;
        let err = db
            .gates()
            .insert(
                999,
                &CodeInput {
                    code: "A1".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::MissingReference));
    }

    #[tokio::test]
    async fn deleting_referenced_airport_reports_in_use() {
        let (db, _dir) = setup_db().await;
        let network = seed_network(&db).await;
        let err = db.airports().delete(network.origin_id).await.unwrap_err();
        assert!(matches!(err, RecordError::InUse));
    }

    #[tokio::test]
    async fn deleting_status_used_by_flight_reports_in_use() {
        let (db, _dir) = setup_db().await;
        let network = seed_network(&db).await;
        let mut tx = db.begin().await.expect("begin");
        db.flights()
            .insert(&mut tx, &new_flight(&network), Utc::now())
            .await
            .expect("flight");
        tx.commit().await.expect("commit");

        let err = db.flight_statuses().delete("SCH").await.unwrap_err();
        assert!(matches!(err, RecordError::InUse));
    }

    #[tokio::test]
    async fn update_and_delete_missing_rows_report_not_found() {
        let (db, _dir) = setup_db().await;
        let input = AirlineInput {
            iata_code: "AF".to_string(),
            icao_code: None,
            name: "Air France".to_string(),
        };
        assert!(matches!(
            db.airlines().update(42, &input, Utc::now()).await,
            Err(RecordError::NotFound)
        ));
        assert!(matches!(
            db.airlines().delete(42).await,
            Err(RecordError::NotFound)
        ));
        assert!(matches!(
            db.flight_statuses().fetch("ZZZ").await,
            Err(RecordError::NotFound)
        ));
    }

    #[tokio::test]
    async fn gate_and_claim_resolve_their_airport() {
        let (db, _dir) = setup_db().await;
        let network = seed_network(&db).await;
        let mut tx = db.begin().await.expect("begin");
        let gate_airport = db
            .gates()
            .airport_of(&mut tx, network.origin_gate_id)
            .await
            .expect("gate lookup");
        let claim_airport = db
            .baggage_claims()
            .airport_of(&mut tx, network.destination_claim_id)
            .await
            .expect("claim lookup");
        let missing = db.gates().airport_of(&mut tx, 999).await.expect("lookup");
        tx.rollback().await.expect("rollback");

        assert_eq!(gate_airport, Some(network.origin_id));
        assert_eq!(claim_airport, Some(network.destination_id));
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn custom_status_can_be_added_and_updated() {
        let (db, _dir) = setup_db().await;
        let statuses = db.flight_statuses();
        statuses
            .insert(&FlightStatusInput {
                code: "RTN".to_string(),
                description: "Returned".to_string(),
                is_final: false,
            })
            .await
            .expect("insert");
        let updated = statuses
            .update(
                "RTN",
                &FlightStatusInput {
                    code: "RTN".to_string(),
                    description: "Returned to stand".to_string(),
                    is_final: true,
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.description, "Returned to stand");
        assert!(updated.is_final);
    }
}
