use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ticketdesk_core::{Ticket, TicketId};

use super::{TicketReader, TicketStoreError, map_sqlx_error};

/// Reads the helpdesk's `tickets` table. Text columns may be NULL there.
#[derive(Debug, Clone)]
pub struct PostgresTicketReader {
    pool: Arc<PgPool>,
}

impl PostgresTicketReader {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TicketReader for PostgresTicketReader {
    #[instrument(skip(self), fields(ticket_id = %id), err)]
    async fn find(&self, id: TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, acceptance_criteria, affected_module
            FROM tickets
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_ticket", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let text = |column: &str| -> Result<String, TicketStoreError> {
            row.try_get::<Option<String>, _>(column)
                .map(Option::unwrap_or_default)
                .map_err(|e| map_sqlx_error("find_ticket", e))
        };

        Ok(Some(Ticket {
            id: TicketId::new(row.try_get("id").map_err(|e| map_sqlx_error("find_ticket", e))?),
            title: text("title")?,
            description: text("description")?,
            acceptance_criteria: text("acceptance_criteria")?,
            affected_module: text("affected_module")?,
        }))
    }
}
