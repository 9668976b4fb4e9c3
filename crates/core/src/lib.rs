//! `ticketdesk-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the job queue and
//! the AI boundary (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod ticket;

pub use error::DomainError;
pub use id::{JobId, TicketId};
pub use ticket::Ticket;
