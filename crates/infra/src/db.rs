//! Database connection and schema bootstrap.
//!
//! The backend is chosen from the URL scheme: `postgres://` / `postgresql://`
//! for shared deployments, `sqlite:` for embedded single-node use and tests.
//! Schema creation is idempotent (`CREATE TABLE IF NOT EXISTS`).

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Connected database handle for one of the supported backends.
#[derive(Debug, Clone)]
pub enum Database {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Connection or bootstrap failure.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("unsupported database url (expected postgres:// or sqlite:): {0}")]
    UnsupportedUrl(String),
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("failed to create schema: {0}")]
    Schema(#[source] sqlx::Error),
}

impl Database {
    /// Connect to the database named by `url`.
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let pool = PgPoolOptions::new()
                .max_connections(8)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(DatabaseError::Connect)?;
            info!(backend = "postgres", "database connected");
            return Ok(Database::Postgres(pool));
        }

        if url.starts_with("sqlite:") {
            return Ok(Database::Sqlite(connect_sqlite(url).await?));
        }

        Err(DatabaseError::UnsupportedUrl(redact(url)))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Database::Postgres(_) => "postgres",
            Database::Sqlite(_) => "sqlite",
        }
    }

    /// Create the job queue and result tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        match self {
            Database::Postgres(pool) => {
                for stmt in POSTGRES_SCHEMA {
                    sqlx::query(stmt)
                        .execute(pool)
                        .await
                        .map_err(DatabaseError::Schema)?;
                }
            }
            Database::Sqlite(pool) => {
                for stmt in SQLITE_SCHEMA {
                    sqlx::query(stmt)
                        .execute(pool)
                        .await
                        .map_err(DatabaseError::Schema)?;
                }
            }
        }
        info!(backend = self.backend(), "database schema ensured");
        Ok(())
    }
}

async fn connect_sqlite(url: &str) -> Result<SqlitePool, DatabaseError> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(url)
        .map_err(DatabaseError::Connect)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    // An in-memory database lives and dies with its connection, so the pool
    // holds exactly one and never recycles it.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new().max_connections(4)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connect)?;
    info!(backend = "sqlite", in_memory, "database connected");
    Ok(pool)
}

/// Drop credentials from a URL before it ends up in an error message.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Postgres schema. `tickets` belongs to the helpdesk application and is not
/// created here.
const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_queue (
        id            BIGSERIAL PRIMARY KEY,
        job_type      TEXT NOT NULL,
        payload       TEXT NOT NULL,
        status        TEXT NOT NULL DEFAULT 'PENDING'
                      CHECK (status IN ('PENDING', 'PROCESSING', 'DONE', 'FAILED')),
        error_message TEXT,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        processed_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS job_queue_status_created_idx
        ON job_queue (status, created_at, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_validations (
        ticket_id   BIGINT PRIMARY KEY,
        is_complete BOOLEAN NOT NULL,
        feedback    TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_code_analyses (
        ticket_id  BIGINT PRIMARY KEY,
        results    TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// SQLite schema. Timestamps are fixed-width RFC 3339 UTC text so that
/// lexical order equals time order.
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_queue (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        job_type      TEXT NOT NULL,
        payload       TEXT NOT NULL,
        status        TEXT NOT NULL DEFAULT 'PENDING'
                      CHECK (status IN ('PENDING', 'PROCESSING', 'DONE', 'FAILED')),
        error_message TEXT,
        created_at    TEXT NOT NULL,
        processed_at  TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS job_queue_status_created_idx
        ON job_queue (status, created_at, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_validations (
        ticket_id   INTEGER PRIMARY KEY,
        is_complete INTEGER NOT NULL,
        feedback    TEXT NOT NULL,
        created_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_code_analyses (
        ticket_id  INTEGER PRIMARY KEY,
        results    TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tickets (
        id                  INTEGER PRIMARY KEY,
        title               TEXT NOT NULL,
        description         TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        affected_module     TEXT NOT NULL DEFAULT ''
    )
    "#,
];
