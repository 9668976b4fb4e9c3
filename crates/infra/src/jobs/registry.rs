//! Job type → handler mapping.
//!
//! Handlers are typed: each declares the payload shape it expects and the
//! registry parses the stored JSON text into it before the call. A payload
//! that does not parse fails the job like any other handler error.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::types::JobType;

/// Side-effecting work for one job type.
///
/// Returning `Err` marks the job FAILED with the error's full context chain.
/// Nothing is retried, so handlers should leave no partial state that a later
/// run could not overwrite.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send + 'static;

    async fn handle(&self, payload: Self::Payload) -> anyhow::Result<()>;
}

/// Why a claimed job ended FAILED.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no handler for job type {0}")]
    NoHandler(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{0:#}")]
    Handler(anyhow::Error),
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("handler task was cancelled")]
    Aborted,
}

/// Type-erased handler: takes the raw payload text.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn call(&self, payload: String) -> Result<(), JobError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: JobHandler> ErasedHandler for Typed<H> {
    async fn call(&self, payload: String) -> Result<(), JobError> {
        let parsed: H::Payload = serde_json::from_str(&payload)
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        self.0.handle(parsed).await.map_err(JobError::Handler)
    }
}

/// Adapter so plain async closures can be registered.
struct FnHandler<P, F> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, F, Fut> JobHandler for FnHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    type Payload = P;

    async fn handle(&self, payload: P) -> anyhow::Result<()> {
        (self.f)(payload).await
    }
}

/// Registry of handlers, one per job type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `job_type`, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, job_type: JobType, handler: H) -> &mut Self {
        self.handlers.insert(job_type, Arc::new(Typed(handler)));
        self
    }

    /// Register an async closure as the handler for `job_type`.
    pub fn register_fn<P, F, Fut>(&mut self, job_type: JobType, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(
            job_type,
            FnHandler {
                f,
                _payload: PhantomData,
            },
        )
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registered job types in tag order.
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub(crate) fn get(&self, job_type: JobType) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.get(&job_type).cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
