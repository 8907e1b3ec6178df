use std::{borrow::Cow, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

mod catalog;
mod events;
mod flights;
mod outbox;

pub use catalog::{
    AirlineRepository, AirportRepository, BaggageClaimRepository, FlightStatusRepository,
    GateRepository, TerminalRepository,
};
pub use events::{AuditLogError, AuditLogRepository, NewAuditEvent};
pub use flights::{FlightRepository, NewFlight};
pub use outbox::{NewOutboxEntry, OutboxEntry, OutboxError, OutboxRepository};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Pragmas are part of the connect options so that every pooled connection
    /// enforces foreign keys, not only the first one.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Begins a transaction that takes the write lock before its first read.
    ///
    /// A deferred transaction that reads and then writes gets `SQLITE_BUSY`
    /// without waiting when another writer committed in between. Writing the
    /// lock row first lets `busy_timeout` queue concurrent writers instead.
    pub async fn begin_write(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE write_lock SET acquired_at = ? WHERE id = 1")
            .bind(to_rfc3339(now))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub fn airlines(&self) -> AirlineRepository {
        AirlineRepository::new(self.pool.clone())
    }

    pub fn airports(&self) -> AirportRepository {
        AirportRepository::new(self.pool.clone())
    }

    pub fn terminals(&self) -> TerminalRepository {
        TerminalRepository::new(self.pool.clone())
    }

    pub fn gates(&self) -> GateRepository {
        GateRepository::new(self.pool.clone())
    }

    pub fn baggage_claims(&self) -> BaggageClaimRepository {
        BaggageClaimRepository::new(self.pool.clone())
    }

    pub fn flight_statuses(&self) -> FlightStatusRepository {
        FlightStatusRepository::new(self.pool.clone())
    }

    /// Returns a handle for interacting with the authoritative flight records.
    pub fn flights(&self) -> FlightRepository {
        FlightRepository::new(self.pool.clone())
    }

    /// Returns a handle for the append-only audit log.
    pub fn audit_log(&self) -> AuditLogRepository {
        AuditLogRepository::new(self.pool.clone())
    }

    /// Returns a handle for the partner notification outbox.
    pub fn outbox(&self) -> OutboxRepository {
        OutboxRepository::new(self.pool.clone())
    }

    /// Runs `PRAGMA wal_checkpoint(TRUNCATE)` and reports the frame counters.
    pub async fn wal_checkpoint_truncate(&self) -> Result<CheckpointStats, sqlx::Error> {
        let row = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .fetch_one(&self.pool)
            .await?;
        Ok(CheckpointStats {
            busy_frames: row.try_get::<i64, _>(0)?,
            log_frames: row.try_get::<i64, _>(1)?,
            checkpointed_frames: row.try_get::<i64, _>(2)?,
        })
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Counters returned by a WAL checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    pub busy_frames: i64,
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors shared by the record repositories (catalog tables and flights).
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record not found")]
    NotFound,
    #[error("a record with the same key already exists")]
    Duplicate,
    #[error("a referenced record does not exist")]
    MissingReference,
    #[error("record is still referenced by other records")]
    InUse,
    #[error("record was modified concurrently")]
    Conflict,
    #[error("database is busy: {0}")]
    Busy(sqlx::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        classify(err, WriteKind::Upsert)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Upsert,
    Delete,
}

const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// Maps SQLite constraint violations onto [`RecordError`] variants.
///
/// A foreign key failure means a dangling reference on insert/update and a
/// still-referenced row on delete.
pub(crate) fn classify(err: sqlx::Error, kind: WriteKind) -> RecordError {
    match err {
        sqlx::Error::RowNotFound => RecordError::NotFound,
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code)
                if code == Cow::Borrowed(SQLITE_CONSTRAINT_UNIQUE)
                    || code == Cow::Borrowed(SQLITE_CONSTRAINT_PRIMARYKEY) =>
            {
                RecordError::Duplicate
            }
            Some(code) if code == Cow::Borrowed(SQLITE_CONSTRAINT_FOREIGNKEY) => match kind {
                WriteKind::Upsert => RecordError::MissingReference,
                WriteKind::Delete => RecordError::InUse,
            },
            Some(code) if is_busy_code(&code) => RecordError::Busy(sqlx::Error::Database(db_err)),
            _ => RecordError::Database(sqlx::Error::Database(db_err)),
        },
        other => RecordError::Database(other),
    }
}

/// Whether `err` is `SQLITE_BUSY`/`SQLITE_LOCKED` or one of their extended codes.
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| is_busy_code(&code)),
        _ => false,
    }
}

fn is_busy_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|code| matches!(code & 0xff, 5 | 6))
        .unwrap_or(false)
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
