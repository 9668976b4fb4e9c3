use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use ticketdesk_ai::{CodeLocation, ValidationVerdict};
use ticketdesk_core::TicketId;

use super::{
    ResultStore, ResultStoreError, StoredAnalysis, StoredValidation, decode_locations,
    encode_locations, map_sqlx_error,
};

#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: Arc<PgPool>,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    #[instrument(skip(self, verdict), fields(ticket_id = %ticket_id), err)]
    async fn upsert_validation(
        &self,
        ticket_id: TicketId,
        verdict: &ValidationVerdict,
    ) -> Result<(), ResultStoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_validations (ticket_id, is_complete, feedback, created_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (ticket_id) DO UPDATE SET
                is_complete = EXCLUDED.is_complete,
                feedback = EXCLUDED.feedback,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(ticket_id.get())
        .bind(verdict.is_complete)
        .bind(&verdict.feedback)
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
            VALUES ($1, $2, now())
            ON CONFLICT (ticket_id) DO UPDATE SET
                results = EXCLUDED.results,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(ticket_id.get())
        .bind(results)
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
            "SELECT is_complete, feedback, created_at FROM ai_validations WHERE ticket_id = $1",
        )
        .bind(ticket_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_validation", e))?;

        row.map(|row| -> Result<StoredValidation, sqlx::Error> {
            Ok(StoredValidation {
                ticket_id,
                is_complete: row.try_get("is_complete")?,
                feedback: row.try_get("feedback")?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("latest_validation", e))
    }

    #[instrument(skip(self), fields(ticket_id = %ticket_id), err)]
    async fn latest_analysis(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredAnalysis>, ResultStoreError> {
        let row = sqlx::query(
            "SELECT results, created_at FROM ai_code_analyses WHERE ticket_id = $1",
        )
        .bind(ticket_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_analysis", e))?;

        row.map(|row| -> Result<StoredAnalysis, sqlx::Error> {
            let results: String = row.try_get("results")?;
            Ok(StoredAnalysis {
                ticket_id,
                locations: decode_locations(ticket_id, &results),
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("latest_analysis", e))
    }
}
