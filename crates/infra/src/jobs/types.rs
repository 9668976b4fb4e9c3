//! Core job types.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ticketdesk_core::JobId;

/// Job type tag selecting the handler that applies.
///
/// Persisted as its `SCREAMING_SNAKE_CASE` tag; the store itself never
/// interprets the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Completeness review of a freshly created ticket.
    ValidateTicket,
    /// Locate source code relevant to a ticket.
    AnalyzeCode,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::ValidateTicket, JobType::AnalyzeCode];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ValidateTicket => "VALIDATE_TICKET",
            JobType::AnalyzeCode => "ANALYZE_CODE",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job type tag that no [`JobType`] variant matches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

/// Job execution status.
///
/// Valid transitions: `Pending -> Processing -> (Done | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a dispatch loop, handler running
    Processing,
    /// Handler returned successfully
    Done,
    /// Handler (or dispatch) failed; see `error_message`
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "PROCESSING" => Some(JobStatus::Processing),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one job, as recorded by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Failed { error: String },
}

impl JobOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Done => JobStatus::Done,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobOutcome::Done => None,
            JobOutcome::Failed { error } => Some(error),
        }
    }
}

/// A durable job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Raw type tag as stored; may name a type this process does not know.
    pub job_type: String,
    /// Serialized payload; opaque to the store.
    pub payload: String,
    pub status: JobStatus,
    /// Set only when `status == Failed`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the job leaves `Processing`.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Resolve the stored tag to a known job type.
    pub fn kind(&self) -> Result<JobType, UnknownJobType> {
        self.job_type.parse()
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl JobStats {
    pub(crate) fn record(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.done + self.failed
    }
}
