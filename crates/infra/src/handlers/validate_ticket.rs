use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tracing::info;

use ticketdesk_ai::TicketValidator;

use super::TicketPayload;
use crate::jobs::JobHandler;
use crate::results::ResultStore;
use crate::tickets::TicketReader;

/// `VALIDATE_TICKET`: review a ticket for completeness and store the verdict.
pub struct ValidateTicketHandler {
    tickets: Arc<dyn TicketReader>,
    results: Arc<dyn ResultStore>,
    validator: TicketValidator,
}

impl ValidateTicketHandler {
    pub fn new(
        tickets: Arc<dyn TicketReader>,
        results: Arc<dyn ResultStore>,
        validator: TicketValidator,
    ) -> Self {
        Self {
            tickets,
            results,
            validator,
        }
    }
}

#[async_trait]
impl JobHandler for ValidateTicketHandler {
    type Payload = TicketPayload;

    async fn handle(&self, payload: TicketPayload) -> anyhow::Result<()> {
        let id = payload.ticket_id;
        let ticket = self
            .tickets
            .find(id)
            .await
            .with_context(|| format!("loading ticket {id}"))?
            .ok_or_else(|| anyhow!("ticket {id} not found"))?;

        let verdict = self
            .validator
            .validate(&ticket)
            .await
            .with_context(|| format!("validating ticket {id}"))?;

        self.results
            .upsert_validation(id, &verdict)
            .await
            .with_context(|| format!("storing validation for ticket {id}"))?;

        info!(
            ticket_id = %id,
            is_complete = verdict.is_complete,
            reasoning = self.validator.uses_reasoning(),
            "ticket validated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ticketdesk_core::{Ticket, TicketId};

    use super::*;
    use crate::handlers::testing::StubReasoning;
    use crate::results::InMemoryResultStore;
    use crate::tickets::InMemoryTicketStore;

    fn setup(validator: TicketValidator) -> (ValidateTicketHandler, Arc<InMemoryResultStore>) {
        let tickets = Arc::new(InMemoryTicketStore::new());
        tickets.insert(Ticket::new(
            TicketId::new(42),
            "Export fails",
            "short",
            "",
            "reports",
        ));
        let results = Arc::new(InMemoryResultStore::new());
        (
            ValidateTicketHandler::new(tickets, results.clone(), validator),
            results,
        )
    }

    #[tokio::test]
    async fn heuristic_verdict_is_stored() {
        let (handler, results) = setup(TicketValidator::heuristic());
        handler
            .handle(TicketPayload::new(TicketId::new(42)))
            .await
            .unwrap();

        let stored = results.latest_validation(TicketId::new(42)).await.unwrap().unwrap();
        assert!(!stored.is_complete);
        assert!(!stored.feedback.is_empty());
    }

    #[tokio::test]
    async fn missing_ticket_fails() {
        let (handler, results) = setup(TicketValidator::heuristic());
        let err = handler
            .handle(TicketPayload::new(TicketId::new(99)))
            .await
            .unwrap_err();
        assert_eq!(format!("{err:#}"), "ticket 99 not found");
        assert!(results.latest_validation(TicketId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reasoning_failure_keeps_cause() {
        let reasoning = Arc::new(StubReasoning::failing("operation timed out"));
        let (handler, results) = setup(TicketValidator::new(Some(reasoning)));

        let err = handler
            .handle(TicketPayload::new(TicketId::new(42)))
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("validating ticket 42: "));
        assert!(message.contains("operation timed out"));
        assert!(results.latest_validation(TicketId::new(42)).await.unwrap().is_none());
    }
}
