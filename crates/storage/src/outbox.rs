use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use fis_core::types::{ChangeType, DeliveryStatus, Partner};

use crate::to_rfc3339;

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: String,
    event_id: String,
    flight_id: i64,
    partner: String,
    change_type: String,
    payload_json: String,
    status: String,
    attempts: i64,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    fn into_entry(self) -> Result<OutboxEntry, OutboxError> {
        let partner =
            Partner::parse(&self.partner).ok_or(OutboxError::Corrupt("partner", self.partner))?;
        let change_type = ChangeType::parse(&self.change_type)
            .ok_or(OutboxError::Corrupt("change_type", self.change_type))?;
        let status = DeliveryStatus::parse(&self.status)
            .ok_or(OutboxError::Corrupt("status", self.status))?;
        Ok(OutboxEntry {
            id: self.id,
            event_id: self.event_id,
            flight_id: self.flight_id,
            partner,
            change_type,
            payload_json: self.payload_json,
            status,
            attempts: self.attempts as u32,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            delivered_at: self.delivered_at,
        })
    }
}

/// A pending or settled partner notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    pub id: String,
    pub event_id: String,
    pub flight_id: i64,
    pub partner: Partner,
    pub change_type: ChangeType,
    #[serde(skip)]
    pub payload_json: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Data required to enqueue a notification.
pub struct NewOutboxEntry<'a> {
    pub id: String,
    pub event_id: &'a str,
    pub flight_id: i64,
    pub partner: Partner,
    pub change_type: ChangeType,
    pub payload_json: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Repository for the `notification_outbox` table.
#[derive(Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueues a notification inside the caller's transaction. The row is due
    /// immediately.
    pub async fn enqueue(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry: &NewOutboxEntry<'_>,
    ) -> Result<(), OutboxError> {
        let created_at = to_rfc3339(entry.created_at);
        sqlx::query(
            "INSERT INTO notification_outbox \
             (id, event_id, flight_id, partner, change_type, payload_json, status, attempts, \
              next_attempt_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.event_id)
        .bind(entry.flight_id)
        .bind(entry.partner.as_str())
        .bind(entry.change_type.as_str())
        .bind(entry.payload_json)
        .bind(DeliveryStatus::Pending.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<OutboxEntry>, OutboxError> {
        let row = sqlx::query_as::<_, OutboxRow>("SELECT * FROM notification_outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OutboxRow::into_entry).transpose()
    }

    /// Lists pending rows whose next attempt is due, oldest first.
    pub async fn due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM notification_outbox \
             WHERE status = ? AND next_attempt_at <= ? \
             ORDER BY next_attempt_at, created_at \
             LIMIT ?",
        )
        .bind(DeliveryStatus::Pending.as_str())
        .bind(to_rfc3339(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxRow::into_entry).collect()
    }

    pub async fn list_for_flight(&self, flight_id: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM notification_outbox WHERE flight_id = ? ORDER BY created_at, partner",
        )
        .bind(flight_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxRow::into_entry).collect()
    }

    pub async fn mark_delivered(
        &self,
        id: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let now = to_rfc3339(now);
        sqlx::query(
            "UPDATE notification_outbox \
             SET status = ?, attempts = ?, last_error = NULL, delivered_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(DeliveryStatus::Delivered.as_str())
        .bind(i64::from(attempts))
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a failed attempt and schedules the next one.
    pub async fn mark_retry(
        &self,
        id: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            "UPDATE notification_outbox \
             SET attempts = ?, next_attempt_at = ?, last_error = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(i64::from(attempts))
        .bind(to_rfc3339(next_attempt_at))
        .bind(error)
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Gives up on a notification after the final attempt.
    pub async fn mark_failed(
        &self,
        id: &str,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            "UPDATE notification_outbox \
             SET status = ?, attempts = ?, last_error = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(DeliveryStatus::Failed.as_str())
        .bind(i64::from(attempts))
        .bind(error)
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Puts a failed notification back in the queue with a fresh attempt budget.
    /// Returns `false` when the row does not exist or is not failed.
    pub async fn requeue(&self, id: &str, now: DateTime<Utc>) -> Result<bool, OutboxError> {
        let now = to_rfc3339(now);
        let result = sqlx::query(
            "UPDATE notification_outbox \
             SET status = ?, attempts = 0, next_attempt_at = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(DeliveryStatus::Pending.as_str())
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(DeliveryStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes up to `limit` delivered rows settled before `threshold`.
    pub async fn purge_delivered_before(
        &self,
        threshold: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM notification_outbox WHERE id IN (\
                SELECT id FROM notification_outbox \
                 WHERE status = ? AND delivered_at < ? \
                 LIMIT ?)",
        )
        .bind(DeliveryStatus::Delivered.as_str())
        .bind(to_rfc3339(threshold))
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn pending_count(&self) -> Result<i64, OutboxError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notification_outbox WHERE status = ?")
                .bind(DeliveryStatus::Pending.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}

/// Errors that can occur while operating on the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox row has invalid {0}: {1}")]
    Corrupt(&'static str, String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
