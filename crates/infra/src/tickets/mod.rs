//! Read access to helpdesk tickets.
//!
//! The `tickets` table belongs to the CRUD application; handlers only need to
//! look a ticket up by id.

mod postgres;
mod sqlite;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use ticketdesk_core::{Ticket, TicketId};

pub use postgres::PostgresTicketReader;
pub use sqlite::SqliteTicketStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TicketStoreError {
    #[error("ticket storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait TicketReader: Send + Sync {
    /// Load a ticket, or `None` if it does not exist.
    async fn find(&self, id: TicketId) -> Result<Option<Ticket>, TicketStoreError>;
}

/// In-memory tickets for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    tickets: RwLock<HashMap<TicketId, Ticket>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ticket: Ticket) {
        let mut tickets = self
            .tickets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tickets.insert(ticket.id, ticket);
    }
}

#[async_trait]
impl TicketReader for InMemoryTicketStore {
    async fn find(&self, id: TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        let tickets = self
            .tickets
            .read()
            .map_err(|_| TicketStoreError::Storage("in-memory ticket store lock poisoned".into()))?;
        Ok(tickets.get(&id).cloned())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TicketStoreError {
    match err {
        sqlx::Error::Database(db_err) => TicketStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            TicketStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => TicketStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
