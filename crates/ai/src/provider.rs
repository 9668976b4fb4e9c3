use async_trait::async_trait;

use crate::result::AiError;

/// External reasoning service (LLM) invoked with a bounded prompt.
///
/// Implementations return the raw assistant text; callers extract the JSON
/// they asked for.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError>;
}

/// Source repository listing/content service.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// List file paths on the default branch, returning at most `max_files`.
    async fn list_files(&self, max_files: usize) -> Result<Vec<String>, AiError>;

    /// Raw text of a file on the default branch.
    async fn file_content(&self, path: &str) -> Result<String, AiError>;

    /// Browser link to a line range, when the host has one.
    fn file_url(&self, _path: &str, _start_line: u32, _end_line: u32) -> Option<String> {
        None
    }
}
