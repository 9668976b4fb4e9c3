use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use ticketdesk_core::{Ticket, TicketId};

use super::{TicketReader, TicketStoreError, map_sqlx_error};

/// Tickets table of an embedded SQLite deployment.
///
/// Without a separate CRUD application, this store also writes tickets.
#[derive(Debug, Clone)]
pub struct SqliteTicketStore {
    pool: Arc<SqlitePool>,
}

impl SqliteTicketStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert or replace a ticket by id.
    #[instrument(skip(self, ticket), fields(ticket_id = %ticket.id), err)]
    pub async fn upsert(&self, ticket: &Ticket) -> Result<(), TicketStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, title, description, acceptance_criteria, affected_module)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                acceptance_criteria = excluded.acceptance_criteria,
                affected_module = excluded.affected_module
            "#,
        )
        .bind(ticket.id.get())
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(&ticket.acceptance_criteria)
        .bind(&ticket.affected_module)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_ticket", e))?;

        Ok(())
    }
}

#[async_trait]
impl TicketReader for SqliteTicketStore {
    #[instrument(skip(self), fields(ticket_id = %id), err)]
    async fn find(&self, id: TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, acceptance_criteria, affected_module
            FROM tickets
            WHERE id = ?1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_ticket", e))?;

        row.map(|row| -> Result<Ticket, sqlx::Error> {
            Ok(Ticket {
                id: TicketId::new(row.try_get("id")?),
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                acceptance_criteria: row.try_get("acceptance_criteria")?,
                affected_module: row.try_get("affected_module")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("find_ticket", e))
    }
}
