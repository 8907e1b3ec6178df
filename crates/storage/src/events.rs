use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use fis_core::types::{AuditEvent, ChangeType, FieldChange};

use crate::to_rfc3339;

#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: String,
    flight_id: i64,
    change_type: String,
    field: String,
    old_value: Option<String>,
    new_value: Option<String>,
    actor: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl AuditEventRow {
    fn into_domain(self) -> Result<AuditEvent, AuditLogError> {
        let change_type = ChangeType::parse(&self.change_type)
            .ok_or_else(|| AuditLogError::UnknownChangeType(self.change_type.clone()))?;
        Ok(AuditEvent {
            id: self.id,
            flight_id: self.flight_id,
            change_type,
            field: self.field,
            old_value: self.old_value,
            new_value: self.new_value,
            actor: self.actor,
            occurred_at: self.occurred_at,
        })
    }
}

/// Data required to append one audit row.
pub struct NewAuditEvent<'a> {
    pub flight_id: i64,
    pub change_type: ChangeType,
    pub change: &'a FieldChange,
    pub actor: Option<&'a str>,
    pub occurred_at: DateTime<Utc>,
}

/// Repository for the append-only `flight_events` table.
#[derive(Clone)]
pub struct AuditLogRepository {
    pool: SqlitePool,
}

impl AuditLogRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an audit row inside the caller's transaction.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: NewAuditEvent<'_>,
    ) -> Result<AuditEvent, AuditLogError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO flight_events \
             (id, flight_id, change_type, field, old_value, new_value, actor, occurred_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(record.flight_id)
        .bind(record.change_type.as_str())
        .bind(&record.change.field)
        .bind(&record.change.old_value)
        .bind(&record.change.new_value)
        .bind(record.actor)
        .bind(to_rfc3339(record.occurred_at))
        .execute(&mut **tx)
        .await?;

        Ok(AuditEvent {
            id,
            flight_id: record.flight_id,
            change_type: record.change_type,
            field: record.change.field.clone(),
            old_value: record.change.old_value.clone(),
            new_value: record.change.new_value.clone(),
            actor: record.actor.map(str::to_string),
            occurred_at: record.occurred_at,
        })
    }

    /// Lists the history of a flight, oldest first.
    pub async fn list_for_flight(&self, flight_id: i64) -> Result<Vec<AuditEvent>, AuditLogError> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM flight_events WHERE flight_id = ? ORDER BY occurred_at, rowid",
        )
        .bind(flight_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEventRow::into_domain).collect()
    }
}

/// Errors that can occur while reading or appending audit rows.
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("unknown change type in audit log: {0}")]
    UnknownChangeType(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
