//! `ticketdesk-ai`
//!
//! **Responsibility:** AI boundary used by the background job handlers.
//!
//! This crate is intentionally storage and transport agnostic:
//! - It knows how to ask for a ticket verdict and how to locate relevant code.
//! - It talks to the outside world only through the [`ReasoningService`] and
//!   [`SourceRepository`] traits; HTTP clients live in `ticketdesk-infra`.
//! - It never persists anything; handlers store what it returns.

pub mod code_search;
mod extract;
pub mod provider;
pub mod result;
pub mod validator;

pub use code_search::{CodeSearcher, FileExcerpt, SearchLimits};
pub use provider::{ReasoningService, SourceRepository};
pub use result::{AiError, CodeLocation, ValidationVerdict};
pub use validator::TicketValidator;
