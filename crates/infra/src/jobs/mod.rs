//! Durable polling job queue.
//!
//! ## Components
//!
//! - `JobStore`: durable job rows with an atomic claim (in-memory, Postgres, SQLite)
//! - `HandlerRegistry`: job type → typed async handler
//! - `Dispatcher`: the polling loop; one job at a time, oldest first
//! - `JobQueue`: enqueue API for collaborators
//! - `JobProcessor`: starts the loop exactly once per process
//!
//! A job moves `PENDING → PROCESSING → (DONE | FAILED)` and never back.
//! Failures are recorded, never retried; re-running means enqueueing again.

pub mod dispatcher;
pub mod lifecycle;
pub mod postgres;
pub mod queue;
pub mod registry;
pub mod sqlite;
pub mod store;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats, ProcessedJob};
pub use lifecycle::JobProcessor;
pub use postgres::PostgresJobStore;
pub use queue::{EnqueueError, JobQueue};
pub use registry::{HandlerRegistry, JobError, JobHandler};
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobId, JobOutcome, JobStats, JobStatus, JobType, UnknownJobType};
