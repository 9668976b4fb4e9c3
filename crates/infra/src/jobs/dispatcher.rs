//! Polling dispatch loop.
//!
//! One iteration claims at most one job, runs its handler to completion and
//! records DONE or FAILED. The loop then sleeps for the poll interval. Jobs are
//! never processed concurrently by one dispatcher.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{HandlerRegistry, JobError};
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobOutcome};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sleep between iterations
    pub poll_interval: Duration,
    /// Upper bound on one handler run; `None` lets handlers run indefinitely
    pub handler_timeout: Option<Duration>,
    /// Name for logging
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            handler_timeout: None,
            name: "job-dispatcher".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub polls: u64,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub store_errors: u64,
}

/// A job handled by one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub id: JobId,
    pub job_type: String,
    pub outcome: JobOutcome,
    /// `false` when the terminal write found the job already gone or terminal.
    pub recorded: bool,
}

/// Claims pending jobs and runs their handlers.
///
/// Cheap to clone; clones share the store, registry and statistics.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            config: DispatcherConfig::default(),
            stats: Arc::new(Mutex::new(DispatcherStats::default())),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut DispatcherStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Run one iteration: claim the oldest pending job (if any), execute it
    /// and record its terminal state.
    ///
    /// Handler failures never surface here; they become FAILED rows. An `Err`
    /// means the store itself failed, and a job that was already claimed
    /// stays PROCESSING.
    pub async fn run_once(&self) -> Result<Option<ProcessedJob>, JobStoreError> {
        self.update_stats(|s| s.polls += 1);

        let job = match self.store.claim_next_pending().await {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.update_stats(|s| s.store_errors += 1);
                return Err(e);
            }
        };

        debug!(
            dispatcher = %self.config.name,
            job_id = %job.id,
            job_type = %job.job_type,
            "claimed job"
        );

        let outcome = match self.execute(&job).await {
            Ok(()) => {
                info!(
                    dispatcher = %self.config.name,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    "job completed"
                );
                JobOutcome::Done
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    dispatcher = %self.config.name,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    error = %message,
                    "job failed"
                );
                JobOutcome::failed(message)
            }
        };

        let recorded = match self.store.mark_terminal(job.id, &outcome).await {
            Ok(recorded) => recorded,
            Err(e) => {
                self.update_stats(|s| s.store_errors += 1);
                return Err(e);
            }
        };
        if !recorded {
            debug!(
                dispatcher = %self.config.name,
                job_id = %job.id,
                "job was no longer processing; terminal state not written"
            );
        }

        self.update_stats(|s| {
            s.jobs_processed += 1;
            match outcome {
                JobOutcome::Done => s.jobs_succeeded += 1,
                JobOutcome::Failed { .. } => s.jobs_failed += 1,
            }
        });

        Ok(Some(ProcessedJob {
            id: job.id,
            job_type: job.job_type,
            outcome,
            recorded,
        }))
    }

    /// Resolve and run the handler for `job` in its own task, so a panic in
    /// the handler fails the job instead of the loop.
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        let kind = job.kind().map_err(|e| JobError::NoHandler(e.0))?;
        let handler = self
            .registry
            .get(kind)
            .ok_or_else(|| JobError::NoHandler(kind.to_string()))?;

        let payload = job.payload.clone();
        let task = tokio::spawn(async move { handler.call(payload).await });

        let joined = match self.config.handler_timeout {
            Some(limit) => {
                let abort = task.abort_handle();
                match tokio::time::timeout(limit, task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort.abort();
                        return Err(JobError::TimedOut(limit));
                    }
                }
            }
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(JobError::Aborted),
        }
    }

    /// Poll until `cancel` fires.
    ///
    /// Cancellation is observed between iterations and during the sleep; an
    /// in-flight handler always runs to completion first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            dispatcher = %self.config.name,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            handler_timeout_secs = self.config.handler_timeout.map(|d| d.as_secs()),
            job_types = ?self.registry.job_types(),
            "job dispatcher started"
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.run_once().await {
                error!(dispatcher = %self.config.name, error = %e, "job poll failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(dispatcher = %self.config.name, "job dispatcher stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
