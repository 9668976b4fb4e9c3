use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use ticketdesk_ai::{CodeLocation, ValidationVerdict};
use ticketdesk_core::TicketId;

use super::{
    ResultStore, ResultStoreError, StoredAnalysis, StoredValidation, decode_locations,
    encode_locations, map_sqlx_error,
};
use crate::jobs::sqlite::{parse_sqlite_timestamp, sqlite_timestamp};

#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    pool: Arc<SqlitePool>,
}

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    #[instrument(skip(self, verdict), fields(ticket_id = %ticket_id), err)]
    async fn upsert_validation(
        &self,
        ticket_id: TicketId,
        verdict: &ValidationVerdict,
    ) -> Result<(), ResultStoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_validations (ticket_id, is_complete, feedback, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (ticket_id) DO UPDATE SET
                is_complete = excluded.is_complete,
                feedback = excluded.feedback,
                created_at = excluded.created_at
            "#,
        )
        .bind(ticket_id.get())
        .bind(verdict.is_complete)
        .bind(&verdict.feedback)
        .bind(sqlite_timestamp(Utc::now()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_validation", e))?;

        Ok(())
    }

    #[instrument(
        skip(self, locations),
        fields(ticket_id = %ticket_id, locations = locations.len()),
        err
    )]
    async fn upsert_analysis(
        &self,
        ticket_id: TicketId,
        locations: &[CodeLocation],
    ) -> Result<(), ResultStoreError> {
        let results = encode_locations(locations)?;
        sqlx::query(
            r#"
            INSERT INTO ai_code_analyses (ticket_id, results, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (ticket_id) DO UPDATE SET
                results = excluded.results,
                created_at = excluded.created_at
            "#,
        )
        .bind(ticket_id.get())
        .bind(results)
        .bind(sqlite_timestamp(Utc::now()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_analysis", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(ticket_id = %ticket_id), err)]
    async fn latest_validation(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredValidation>, ResultStoreError> {
        let row = sqlx::query(
            "SELECT is_complete, feedback, created_at FROM ai_validations WHERE ticket_id = ?1",
        )
        .bind(ticket_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_validation", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |e: sqlx::Error| map_sqlx_error("latest_validation", e);
        let created_at: String = row.try_get("created_at").map_err(read)?;

        Ok(Some(StoredValidation {
            ticket_id,
            is_complete: row.try_get("is_complete").map_err(read)?,
            feedback: row.try_get("feedback").map_err(read)?,
            created_at: parse_sqlite_timestamp(&created_at).map_err(ResultStoreError::Storage)?,
        }))
    }

    #[instrument(skip(self), fields(ticket_id = %ticket_id), err)]
    async fn latest_analysis(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredAnalysis>, ResultStoreError> {
        let row = sqlx::query(
            "SELECT results, created_at FROM ai_code_analyses WHERE ticket_id = ?1",
        )
        .bind(ticket_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_analysis", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |e: sqlx::Error| map_sqlx_error("latest_analysis", e);
        let results: String = row.try_get("results").map_err(read)?;
        let created_at: String = row.try_get("created_at").map_err(read)?;

        Ok(Some(StoredAnalysis {
            ticket_id,
            locations: decode_locations(ticket_id, &results),
            created_at: parse_sqlite_timestamp(&created_at).map_err(ResultStoreError::Storage)?,
        }))
    }
}
