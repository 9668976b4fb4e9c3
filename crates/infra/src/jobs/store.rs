//! Job storage abstraction and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::types::{Job, JobId, JobOutcome, JobStats, JobStatus};

/// Durable storage of job rows.
///
/// All mutation of job state goes through [`JobStore::claim_next_pending`] and
/// [`JobStore::mark_terminal`]. Implementations must make the claim a single
/// atomic conditional transition so that several dispatch loops (possibly in
/// different processes) never receive the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `PENDING` job stamped with the current time.
    ///
    /// Returns only after the row is durably recorded.
    async fn insert(&self, job_type: &str, payload: &str) -> Result<JobId, JobStoreError>;

    /// Atomically flip the oldest `PENDING` job (by `created_at`, then id) to
    /// `PROCESSING` and return it, or `None` if nothing is pending.
    async fn claim_next_pending(&self) -> Result<Option<Job>, JobStoreError>;

    /// Record the terminal state of a `PROCESSING` job and stamp `processed_at`.
    ///
    /// Returns `false` when no transition happened (job missing or not in
    /// `PROCESSING`); callers treat that as benign.
    async fn mark_terminal(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, JobStoreError>;

    /// Get a job by ID.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Job counts per status.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("corrupt job row: {0}")]
    Decode(String),
}

/// In-memory job store for tests/dev.
///
/// The whole claim runs under one lock, which is the in-process equivalent of
/// the conditional update the SQL stores use.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, JobStoreError> {
        self.inner
            .lock()
            .map_err(|_| JobStoreError::Storage("in-memory job store lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job_type: &str, payload: &str) -> Result<JobId, JobStoreError> {
        let mut inner = self.lock()?;
        inner.last_id += 1;
        let id = JobId::new(inner.last_id);
        inner.jobs.insert(
            id,
            Job {
                id,
                job_type: job_type.to_string(),
                payload: payload.to_string(),
                status: JobStatus::Pending,
                error_message: None,
                created_at: Utc::now(),
                processed_at: None,
            },
        );
        Ok(id)
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.lock()?;

        let next = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            inner.jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Processing;
                job.clone()
            })
        }))
    }

    async fn mark_terminal(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, JobStoreError> {
        let mut inner = self.lock()?;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status.can_transition_to(outcome.status()) => {
                job.status = outcome.status();
                job.error_message = outcome.error_message().map(str::to_string);
                job.processed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let inner = self.lock()?;
        let mut stats = JobStats::default();
        for job in inner.jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}
