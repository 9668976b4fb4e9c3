//! Stored AI results, one row per ticket and kind.
//!
//! Writes are latest-wins upserts keyed by ticket id, so re-running a job
//! replaces the earlier result. A missing row means "not processed yet"; an
//! analysis row with no locations is a completed, empty result.

mod postgres;
mod sqlite;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use ticketdesk_ai::{CodeLocation, ValidationVerdict};
use ticketdesk_core::TicketId;

pub use postgres::PostgresResultStore;
pub use sqlite::SqliteResultStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValidation {
    pub ticket_id: TicketId,
    pub is_complete: bool,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub ticket_id: TicketId,
    pub locations: Vec<CodeLocation>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResultStoreError {
    #[error("result storage error: {0}")]
    Storage(String),
    #[error("failed to encode result: {0}")]
    Encode(String),
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn upsert_validation(
        &self,
        ticket_id: TicketId,
        verdict: &ValidationVerdict,
    ) -> Result<(), ResultStoreError>;

    async fn upsert_analysis(
        &self,
        ticket_id: TicketId,
        locations: &[CodeLocation],
    ) -> Result<(), ResultStoreError>;

    async fn latest_validation(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredValidation>, ResultStoreError>;

    async fn latest_analysis(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredAnalysis>, ResultStoreError>;
}

/// Locations are kept as opaque JSON text in the store.
pub(crate) fn encode_locations(locations: &[CodeLocation]) -> Result<String, ResultStoreError> {
    serde_json::to_string(locations).map_err(|e| ResultStoreError::Encode(e.to_string()))
}

/// Unreadable result text reads as an empty analysis.
pub(crate) fn decode_locations(ticket_id: TicketId, raw: &str) -> Vec<CodeLocation> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(ticket_id = %ticket_id, error = %e, "stored code analysis is not valid JSON");
        Vec::new()
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ResultStoreError {
    match err {
        sqlx::Error::Database(db_err) => ResultStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            ResultStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => ResultStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// In-memory result store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    validations: RwLock<HashMap<TicketId, StoredValidation>>,
    analyses: RwLock<HashMap<TicketId, StoredAnalysis>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn upsert_validation(
        &self,
        ticket_id: TicketId,
        verdict: &ValidationVerdict,
    ) -> Result<(), ResultStoreError> {
        self.validations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                ticket_id,
                StoredValidation {
                    ticket_id,
                    is_complete: verdict.is_complete,
                    feedback: verdict.feedback.clone(),
                    created_at: Utc::now(),
                },
            );
        Ok(())
    }

    async fn upsert_analysis(
        &self,
        ticket_id: TicketId,
        locations: &[CodeLocation],
    ) -> Result<(), ResultStoreError> {
        self.analyses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                ticket_id,
                StoredAnalysis {
                    ticket_id,
                    locations: locations.to_vec(),
                    created_at: Utc::now(),
                },
            );
        Ok(())
    }

    async fn latest_validation(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredValidation>, ResultStoreError> {
        Ok(self
            .validations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticket_id)
            .cloned())
    }

    async fn latest_analysis(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<StoredAnalysis>, ResultStoreError> {
        Ok(self
            .analyses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticket_id)
            .cloned())
    }
}
