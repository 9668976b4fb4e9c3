use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Completeness verdict for a ticket.
///
/// Field names match the JSON shape the reasoning service is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_complete: bool,
    pub feedback: String,
}

impl ValidationVerdict {
    pub fn new(is_complete: bool, feedback: impl Into<String>) -> Self {
        Self {
            is_complete,
            feedback: feedback.into(),
        }
    }
}

/// A span of source code the reasoning service considers relevant to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub explanation: String,
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("reasoning service request failed: {0}")]
    Transport(String),

    #[error("reasoning service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse reasoning response: {0}")]
    Parse(String),

    #[error("source repository error: {0}")]
    Repository(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}
