//! Infrastructure layer: database, job queue, result storage, external services.
//!
//! The job queue (`jobs`) is storage-agnostic; `db` picks the backend and
//! `handlers` wires the AI boundary to the ticket and result stores.

pub mod config;
pub mod db;
pub mod external;
pub mod handlers;
pub mod jobs;
pub mod results;
pub mod tickets;

mod integration_tests;

pub use config::{AppConfig, ConfigError};
pub use db::{Database, DatabaseError};
