//! SQLite-backed job store for embedded single-node deployments.
//!
//! SQLite has no `SKIP LOCKED`; writers are serialized by the database lock,
//! and the claim is a single `UPDATE … WHERE id = (SELECT …) AND status =
//! 'PENDING' RETURNING …` statement, so a row can only be flipped once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobOutcome, JobStats, JobStatus};

const JOB_COLUMNS: &str = "id, job_type, payload, status, error_message, created_at, processed_at";

#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: Arc<SqlitePool>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

/// Fixed-width UTC timestamp; sorts lexically in time order.
pub(crate) fn sqlite_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_sqlite_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, payload), fields(job_type = %job_type), err)]
    async fn insert(&self, job_type: &str, payload: &str) -> Result<JobId, JobStoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO job_queue (job_type, payload, status, created_at)
            VALUES (?1, ?2, 'PENDING', ?3)
            RETURNING id
            "#,
        )
        .bind(job_type)
        .bind(payload)
        .bind(sqlite_timestamp(Utc::now()))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(JobId::new(id))
    }

    #[instrument(skip(self), err)]
    async fn claim_next_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE job_queue
            SET status = 'PROCESSING'
            WHERE id = (
                SELECT id FROM job_queue
                WHERE status = 'PENDING'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'PENDING'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next_pending", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, outcome), fields(job_id = %id, status = %outcome.status()), err)]
    async fn mark_terminal(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = ?2, error_message = ?3, processed_at = ?4
            WHERE id = ?1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.get())
        .bind(outcome.status().as_str())
        .bind(outcome.error_message())
        .bind(sqlite_timestamp(Utc::now()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_terminal", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM job_queue GROUP BY status")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            let status = JobStatus::parse(&status)
                .ok_or_else(|| JobStoreError::Decode(format!("unknown job status: {status}")))?;
            stats.record(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job, JobStoreError> {
    let decode = |e: sqlx::Error| JobStoreError::Decode(format!("failed to read job row: {e}"));

    let status: String = row.try_get("status").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let processed_at: Option<String> = row.try_get("processed_at").map_err(decode)?;

    Ok(Job {
        id: JobId::new(row.try_get("id").map_err(decode)?),
        job_type: row.try_get("job_type").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| JobStoreError::Decode(format!("unknown job status: {status}")))?,
        error_message: row.try_get("error_message").map_err(decode)?,
        created_at: parse_sqlite_timestamp(&created_at).map_err(JobStoreError::Decode)?,
        processed_at: processed_at
            .as_deref()
            .map(parse_sqlite_timestamp)
            .transpose()
            .map_err(JobStoreError::Decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            JobStoreError::Decode(format!("decode error in {operation}: {err}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::Database;
    use crate::jobs::store::contract;

    async fn store() -> Arc<dyn JobStore> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.ensure_schema().await.unwrap();
        let Database::Sqlite(pool) = db else {
            panic!("expected sqlite");
        };
        Arc::new(SqliteJobStore::new(pool))
    }

    #[tokio::test]
    async fn claims_oldest_first() {
        contract::claims_oldest_first(store().await).await;
    }

    #[tokio::test]
    async fn terminal_states_are_final() {
        contract::terminal_states_are_final(store().await).await;
    }

    #[tokio::test]
    async fn mark_terminal_on_missing_job_is_benign() {
        contract::mark_terminal_on_missing_job_is_benign(store().await).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_a_job() {
        contract::concurrent_claims_never_share_a_job(store().await).await;
    }

    #[tokio::test]
    async fn stats_count_each_status() {
        contract::stats_count_each_status(store().await).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_database_shares_claims_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());

        let first = Database::connect(&url).await.unwrap();
        first.ensure_schema().await.unwrap();
        let second = Database::connect(&url).await.unwrap();
        let (Database::Sqlite(a), Database::Sqlite(b)) = (first, second) else {
            panic!("expected sqlite");
        };
        let a: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(a));
        let b: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(b));

        for _ in 0..10 {
            a.insert("VALIDATE_TICKET", "{}").await.unwrap();
        }

        let drain = |store: Arc<dyn JobStore>| {
            tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = store.claim_next_pending().await.unwrap() {
                    ids.push(job.id);
                }
                ids
            })
        };
        let (from_a, from_b) = tokio::join!(drain(a.clone()), drain(b.clone()));
        let mut all: Vec<JobId> = from_a.unwrap().into_iter().chain(from_b.unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 10);
        assert_eq!(b.stats().await.unwrap().processing, 10);
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let early = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = early + chrono::Duration::microseconds(1_500);
        let (a, b) = (sqlite_timestamp(early), sqlite_timestamp(later));
        assert_eq!(a, "2026-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_sqlite_timestamp(&b).unwrap(), later);
    }
}
