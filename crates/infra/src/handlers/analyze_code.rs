use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tracing::info;

use ticketdesk_ai::CodeSearcher;

use super::TicketPayload;
use crate::jobs::JobHandler;
use crate::results::ResultStore;
use crate::tickets::TicketReader;

/// `ANALYZE_CODE`: locate source relevant to a ticket and store the locations.
///
/// Finding nothing is a success; an empty analysis is stored.
pub struct AnalyzeCodeHandler {
    tickets: Arc<dyn TicketReader>,
    results: Arc<dyn ResultStore>,
    searcher: CodeSearcher,
}

impl AnalyzeCodeHandler {
    pub fn new(
        tickets: Arc<dyn TicketReader>,
        results: Arc<dyn ResultStore>,
        searcher: CodeSearcher,
    ) -> Self {
        Self {
            tickets,
            results,
            searcher,
        }
    }
}

#[async_trait]
impl JobHandler for AnalyzeCodeHandler {
    type Payload = TicketPayload;

    async fn handle(&self, payload: TicketPayload) -> anyhow::Result<()> {
        let id = payload.ticket_id;
        let ticket = self
            .tickets
            .find(id)
            .await
            .with_context(|| format!("loading ticket {id}"))?
            .ok_or_else(|| anyhow!("ticket {id} not found"))?;

        let locations = self
            .searcher
            .analyze(&ticket)
            .await
            .with_context(|| format!("analyzing code for ticket {id}"))?;

        self.results
            .upsert_analysis(id, &locations)
            .await
            .with_context(|| format!("storing code analysis for ticket {id}"))?;

        info!(ticket_id = %id, locations = locations.len(), "code analysis stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ticketdesk_core::{Ticket, TicketId};

    use super::*;
    use crate::handlers::testing::{StubReasoning, StubRepository};
    use crate::results::InMemoryResultStore;
    use crate::tickets::InMemoryTicketStore;

    fn tickets() -> Arc<InMemoryTicketStore> {
        let tickets = Arc::new(InMemoryTicketStore::new());
        tickets.insert(Ticket::new(
            TicketId::new(7),
            "Invoice totals wrong",
            "Invoice totals ignore the discount column",
            "Totals include discounts",
            "billing",
        ));
        tickets
    }

    #[tokio::test]
    async fn no_candidates_stores_empty_analysis_without_reasoning() {
        let reasoning = Arc::new(StubReasoning::replying("[]"));
        let repository = Arc::new(StubRepository::default().with_file("README.md", "# readme"));
        let results = Arc::new(InMemoryResultStore::new());
        let handler = AnalyzeCodeHandler::new(
            tickets(),
            results.clone(),
            CodeSearcher::new(repository, Some(reasoning.clone())),
        );

        handler.handle(TicketPayload::new(TicketId::new(7))).await.unwrap();

        let stored = results.latest_analysis(TicketId::new(7)).await.unwrap().unwrap();
        assert!(stored.locations.is_empty());
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn locations_from_reasoning_are_stored() {
        let reasoning = Arc::new(StubReasoning::replying(
            r#"Here you go: [{"file_path": "src/billing/invoice.rs",
                "start_line": 3, "end_line": 9, "explanation": "sums totals"}]"#,
        ));
        let repository = Arc::new(
            StubRepository::default()
                .with_file("src/billing/invoice.rs", "fn total() {}")
                .with_file("src/auth/login.rs", "fn login() {}"),
        );
        let results = Arc::new(InMemoryResultStore::new());
        let handler = AnalyzeCodeHandler::new(
            tickets(),
            results.clone(),
            CodeSearcher::new(repository, Some(reasoning.clone())),
        );

        handler.handle(TicketPayload::new(TicketId::new(7))).await.unwrap();

        let stored = results.latest_analysis(TicketId::new(7)).await.unwrap().unwrap();
        assert_eq!(stored.locations.len(), 1);
        assert_eq!(stored.locations[0].file_path, "src/billing/invoice.rs");
        assert_eq!(reasoning.call_count(), 1);
    }
}
