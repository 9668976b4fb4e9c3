//! Postgres-backed job store.
//!
//! The claim is one statement: the inner `SELECT … FOR UPDATE SKIP LOCKED`
//! picks the oldest pending row that no other transaction holds, and the outer
//! `UPDATE` flips it to `PROCESSING` and returns it. Two workers racing on the
//! same row never both see it; the loser skips to the next row (or gets none).
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database / PoolClosed / other | `Storage` |
//! | Row decode failure | `Decode` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobOutcome, JobStats, JobStatus};

const JOB_COLUMNS: &str = "id, job_type, payload, status, error_message, created_at, processed_at";

/// Postgres-backed job store.
///
/// `Send + Sync`; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, payload), fields(job_type = %job_type), err)]
    async fn insert(&self, job_type: &str, payload: &str) -> Result<JobId, JobStoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO job_queue (job_type, payload, status, created_at)
            VALUES ($1, $2, 'PENDING', now())
            RETURNING id
            "#,
        )
        .bind(job_type)
        .bind(payload)
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
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
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
            SET status = $2, error_message = $3, processed_at = now()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.get())
        .bind(outcome.status().as_str())
        .bind(outcome.error_message())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_terminal", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
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

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let decode = |e: sqlx::Error| JobStoreError::Decode(format!("failed to read job row: {e}"));

    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Job {
        id: JobId::new(row.try_get("id").map_err(decode)?),
        job_type: row.try_get("job_type").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| JobStoreError::Decode(format!("unknown job status: {status}")))?,
        error_message: row.try_get("error_message").map_err(decode)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        processed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("processed_at")
            .map_err(decode)?,
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
