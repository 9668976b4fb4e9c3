//! Ticket completeness review.

use std::sync::Arc;

use tracing::debug;

use ticketdesk_core::Ticket;

use crate::extract::json_span;
use crate::provider::ReasoningService;
use crate::result::{AiError, ValidationVerdict};

const VALIDATION_MAX_TOKENS: u32 = 512;

const MIN_TITLE_CHARS: usize = 10;
const MIN_DESCRIPTION_CHARS: usize = 30;
const MIN_ACCEPTANCE_CHARS: usize = 10;

const PARSE_FALLBACK_FEEDBACK: &str =
    "AI validation encountered a parsing error. Please review manually.";

/// Produces a completeness verdict for a ticket.
///
/// With a reasoning service the verdict comes from the model; without one a
/// deterministic length heuristic is used so the pipeline still works in
/// environments that have no API key.
#[derive(Clone, Default)]
pub struct TicketValidator {
    reasoning: Option<Arc<dyn ReasoningService>>,
}

impl TicketValidator {
    pub fn new(reasoning: Option<Arc<dyn ReasoningService>>) -> Self {
        Self { reasoning }
    }

    pub fn heuristic() -> Self {
        Self { reasoning: None }
    }

    pub fn uses_reasoning(&self) -> bool {
        self.reasoning.is_some()
    }

    pub async fn validate(&self, ticket: &Ticket) -> Result<ValidationVerdict, AiError> {
        let Some(reasoning) = &self.reasoning else {
            return Ok(heuristic_verdict(ticket));
        };

        let reply = reasoning
            .complete(&validation_prompt(ticket), VALIDATION_MAX_TOKENS)
            .await?;
        Ok(parse_verdict(&reply))
    }
}

/// Length-based completeness check used when no reasoning service is configured.
pub fn heuristic_verdict(ticket: &Ticket) -> ValidationVerdict {
    let title_ok = ticket.title.trim().chars().count() >= MIN_TITLE_CHARS;
    let description_ok = ticket.description.trim().chars().count() >= MIN_DESCRIPTION_CHARS;
    let acceptance_ok = ticket.acceptance_criteria.trim().chars().count() >= MIN_ACCEPTANCE_CHARS;
    let module_ok = !ticket.affected_module.trim().is_empty();

    let is_complete = title_ok && description_ok && acceptance_ok && module_ok;

    let mut parts: Vec<&str> = Vec::new();
    if !title_ok {
        parts.push("Title is too short or vague.");
    }
    if !description_ok {
        parts.push("Description lacks detail.");
    }
    if !acceptance_ok {
        parts.push("Missing clear acceptance criteria.");
    }
    if !module_ok {
        parts.push("Affected module is not specified.");
    }
    if is_complete {
        parts.push("Ticket looks reasonably complete based on heuristics.");
    }

    ValidationVerdict::new(is_complete, parts.join(" "))
}

pub fn validation_prompt(ticket: &Ticket) -> String {
    format!(
        r#"You review ticket quality for a software development team.

A ticket is complete only if it has all of:
1. A specific title (not "fix bug" or "update something")
2. A description that explains the problem or requirement in detail
3. Testable acceptance criteria that define when the work is done
4. A concrete affected module or feature area

Ticket:
- Title: {title}
- Description: {description}
- Acceptance Criteria: {acceptance}
- Affected Module: {module}

Reply ONLY with JSON of this exact shape:
{{
  "is_complete": true or false,
  "feedback": "One or two sentences of actionable feedback. If complete, say what is well defined; otherwise say exactly what is missing."
}}"#,
        title = ticket.title,
        description = ticket.description,
        acceptance = ticket.acceptance_criteria,
        module = ticket.affected_module,
    )
}

/// Parse the model reply. An unreadable reply yields an incomplete verdict
/// asking for manual review instead of an error.
pub fn parse_verdict(reply: &str) -> ValidationVerdict {
    let candidate = json_span(reply, '{', '}').unwrap_or(reply);
    match serde_json::from_str::<ValidationVerdict>(candidate) {
        Ok(verdict) => verdict,
        Err(err) => {
            debug!(error = %err, "unparseable validation reply");
            ValidationVerdict::new(false, PARSE_FALLBACK_FEEDBACK)
        }
    }
}
