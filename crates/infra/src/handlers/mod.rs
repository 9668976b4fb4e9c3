//! Concrete job handlers.
//!
//! Both job types carry the same payload, `{"ticketId": <id>}`.

mod analyze_code;
mod validate_ticket;

use serde::{Deserialize, Serialize};

use ticketdesk_core::TicketId;

pub use analyze_code::AnalyzeCodeHandler;
pub use validate_ticket::ValidateTicketHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPayload {
    #[serde(rename = "ticketId")]
    pub ticket_id: TicketId,
}

impl TicketPayload {
    pub fn new(ticket_id: TicketId) -> Self {
        Self { ticket_id }
    }
}
