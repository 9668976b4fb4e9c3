//! Read shape of a helpdesk ticket.
//!
//! Tickets are created and edited by the CRUD side of the application; job
//! handlers only ever read them.

use serde::{Deserialize, Serialize};

use crate::id::TicketId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub affected_module: String,
}

impl Ticket {
    pub fn new(
        id: TicketId,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: impl Into<String>,
        affected_module: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            acceptance_criteria: acceptance_criteria.into(),
            affected_module: affected_module.into(),
        }
    }
}
