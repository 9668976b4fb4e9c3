//! Enqueue API: the write side used by collaborators to submit work.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use ticketdesk_core::TicketId;

use super::store::{JobStore, JobStoreError};
use super::types::{JobId, JobType, UnknownJobType};
use crate::handlers::TicketPayload;

/// Enqueue failure; the job was not created.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    UnknownJobType(#[from] UnknownJobType),
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Submits jobs to the store.
///
/// `enqueue` returns only after the row is durably written, so an `Ok` means
/// the job will eventually be attempted.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, payload), fields(job_type = %job_type), err)]
    pub async fn enqueue<P>(&self, job_type: JobType, payload: &P) -> Result<JobId, EnqueueError>
    where
        P: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_string(payload).map_err(EnqueueError::Serialize)?;
        let id = self.store.insert(job_type.as_str(), &payload).await?;
        info!(job_id = %id, job_type = %job_type, "job enqueued");
        Ok(id)
    }

    /// Enqueue by raw tag; tags that name no known job type are rejected.
    pub async fn enqueue_tagged(
        &self,
        job_type: &str,
        payload: &serde_json::Value,
    ) -> Result<JobId, EnqueueError> {
        let job_type: JobType = job_type.parse()?;
        self.enqueue(job_type, payload).await
    }

    pub async fn validate_ticket(&self, ticket_id: TicketId) -> Result<JobId, EnqueueError> {
        self.enqueue(JobType::ValidateTicket, &TicketPayload::new(ticket_id))
            .await
    }

    pub async fn analyze_code(&self, ticket_id: TicketId) -> Result<JobId, EnqueueError> {
        self.enqueue(JobType::AnalyzeCode, &TicketPayload::new(ticket_id))
            .await
    }
}
