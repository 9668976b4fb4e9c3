//! Locating code relevant to a ticket.
//!
//! Pipeline: keywords from ticket text -> candidate paths from one repository
//! listing -> bounded excerpts -> reasoning service -> parsed locations.
//! Every stage is capped so handler latency and prompt size stay bounded.

use std::sync::Arc;

use tracing::{debug, warn};

use ticketdesk_core::Ticket;

use crate::extract::json_span;
use crate::provider::{ReasoningService, SourceRepository};
use crate::result::{AiError, CodeLocation};

const ANALYSIS_MAX_TOKENS: u32 = 2048;
const MAX_KEYWORDS: usize = 6;
const MIN_KEYWORD_CHARS: usize = 4;

const STOP_WORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "been", "will", "when", "where", "should", "would",
    "could", "which", "there", "their", "what", "more",
];

/// Caps applied to one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Maximum candidate files sent to the reasoning service.
    pub max_files: usize,
    /// Characters kept from each file.
    pub max_file_chars: usize,
    /// Maximum paths read from the repository listing.
    pub max_listing: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_files: 8,
            max_file_chars: 4000,
            max_listing: 500,
        }
    }
}

/// A truncated file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
}

impl FileExcerpt {
    pub fn truncated(path: impl Into<String>, raw: &str, max_chars: usize) -> Self {
        let content = match raw.char_indices().nth(max_chars) {
            Some((cut, _)) => raw[..cut].to_string(),
            None => raw.to_string(),
        };
        Self {
            path: path.into(),
            content,
        }
    }
}

pub struct CodeSearcher {
    repository: Arc<dyn SourceRepository>,
    reasoning: Option<Arc<dyn ReasoningService>>,
    limits: SearchLimits,
}

impl CodeSearcher {
    pub fn new(
        repository: Arc<dyn SourceRepository>,
        reasoning: Option<Arc<dyn ReasoningService>>,
    ) -> Self {
        Self {
            repository,
            reasoning,
            limits: SearchLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> SearchLimits {
        self.limits
    }

    /// Run the full search. An empty result is a successful "nothing relevant
    /// found", not an error.
    pub async fn analyze(&self, ticket: &Ticket) -> Result<Vec<CodeLocation>, AiError> {
        let listing = self.repository.list_files(self.limits.max_listing).await?;
        let keywords = extract_keywords(&ticket.affected_module, &ticket.description);
        let candidates = select_candidates(&listing, &keywords, self.limits.max_files);

        debug!(
            ticket_id = %ticket.id,
            listed = listing.len(),
            keywords = ?keywords,
            candidates = candidates.len(),
            "code search candidates selected"
        );

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut excerpts = Vec::with_capacity(candidates.len());
        for path in candidates {
            match self.repository.file_content(&path).await {
                Ok(raw) => excerpts.push(FileExcerpt::truncated(
                    path,
                    &raw,
                    self.limits.max_file_chars,
                )),
                Err(err) => {
                    // Binary, missing or forbidden files are skipped.
                    warn!(
                        ticket_id = %ticket.id,
                        path = %path,
                        error = %err,
                        "skipping unreadable file"
                    );
                }
            }
        }

        if excerpts.is_empty() {
            return Ok(Vec::new());
        }

        let reasoning = self.reasoning.as_ref().ok_or_else(|| {
            AiError::NotConfigured("reasoning service is required for code analysis".to_string())
        })?;

        let reply = reasoning
            .complete(&analysis_prompt(ticket, &excerpts), ANALYSIS_MAX_TOKENS)
            .await?;
        Ok(parse_locations(&reply))
    }
}

/// Search keywords derived from the affected module and description.
pub fn extract_keywords(affected_module: &str, description: &str) -> Vec<String> {
    let text = format!("{affected_module} {description}").to_lowercase();
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut keywords: Vec<String> = Vec::new();
    for word in cleaned.split_whitespace() {
        if word.len() < MIN_KEYWORD_CHARS || STOP_WORDS.contains(&word) {
            continue;
        }
        if keywords.iter().any(|k| k == word) {
            continue;
        }
        keywords.push(word.to_string());
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

/// Paths containing any keyword (case-insensitive), keyword order first,
/// de-duplicated, at most `max_files`.
pub fn select_candidates(files: &[String], keywords: &[String], max_files: usize) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    if max_files == 0 {
        return selected;
    }

    'keywords: for keyword in keywords {
        let keyword = keyword.to_lowercase();
        for file in files {
            if !file.to_lowercase().contains(&keyword) {
                continue;
            }
            if !selected.contains(file) {
                selected.push(file.clone());
            }
            if selected.len() >= max_files {
                break 'keywords;
            }
        }
    }
    selected
}

pub fn analysis_prompt(ticket: &Ticket, excerpts: &[FileExcerpt]) -> String {
    let file_blocks = excerpts
        .iter()
        .enumerate()
        .map(|(i, f)| format!("=== File {}: {} ===\n{}", i + 1, f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You help developers find where a change request should be implemented.

Ticket:
- Title: {title}
- Description: {description}
- Acceptance Criteria: {acceptance}
- Affected Module: {module}

Source files (possibly truncated):
{file_blocks}

List the code locations that most likely need to change. For each one give the
file path exactly as shown above, an estimated start and end line, and a short
explanation of why it is relevant and what should change.

Reply ONLY with a JSON array, no surrounding text:
[
  {{
    "file_path": "path/to/file.ext",
    "start_line": 42,
    "end_line": 58,
    "explanation": "Handles X, which must be extended to support Y."
  }}
]

If nothing is relevant reply with []"#,
        title = ticket.title,
        description = ticket.description,
        acceptance = ticket.acceptance_criteria,
        module = ticket.affected_module,
    )
}

/// Parse the model reply into locations; an unreadable reply yields none.
///
/// Elements are decoded one by one, so a malformed entry is dropped without
/// discarding the valid ones next to it.
pub fn parse_locations(reply: &str) -> Vec<CodeLocation> {
    let Some(candidate) = json_span(reply, '[', ']') else {
        return Vec::new();
    };
    let elements = match serde_json::from_str::<Vec<serde_json::Value>>(candidate) {
        Ok(elements) => elements,
        Err(err) => {
            debug!(error = %err, "unparseable code analysis reply");
            return Vec::new();
        }
    };

    elements
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| {
            serde_json::from_value::<CodeLocation>(element)
                .inspect_err(|err| debug!(index, error = %err, "skipping malformed code location"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use ticketdesk_core::TicketId;

    struct StubRepository {
        files: Vec<String>,
        contents: HashMap<String, String>,
    }

    #[async_trait]
    impl SourceRepository for StubRepository {
        async fn list_files(&self, max_files: usize) -> Result<Vec<String>, AiError> {
            Ok(self.files.iter().take(max_files).cloned().collect())
        }

        async fn file_content(&self, path: &str) -> Result<String, AiError> {
            self.contents
                .get(path)
                .cloned()
                .ok_or_else(|| AiError::Repository(format!("cannot fetch {path}: 404")))
        }
    }

    #[derive(Default)]
    struct RecordingReasoning {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReasoningService for RecordingReasoning {
        async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, AiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(r#"[{"file_path": "src/billing/invoice.rs",
                "start_line": 10, "end_line": 20, "explanation": "builds rows"}]"#
                .to_string())
        }
    }

    fn ticket() -> Ticket {
        Ticket::new(
            TicketId::new(7),
            "Invoice export",
            "The invoice export should include the billing address.",
            "Address column present",
            "billing",
        )
    }

    #[test]
    fn keywords_skip_short_and_stop_words() {
        let keywords =
            extract_keywords("Billing", "This should export the invoice, with billing-address!");
        assert_eq!(keywords, vec!["billing", "export", "invoice", "address"]);
    }

    #[test]
    fn keywords_are_capped() {
        let keywords = extract_keywords("", "alpha bravo charlie delta echoes foxtrot golfs hotel");
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "alpha");
        assert_eq!(keywords[5], "foxtrot");
    }

    #[test]
    fn candidates_follow_keyword_order_without_duplicates() {
        let files: Vec<String> = [
            "src/Invoice.rs",
            "src/billing/invoice.rs",
            "src/billing/mod.rs",
            "README.md",
        ]
        .iter()
            .map(|s| s.to_string())
            .collect();
        let keywords = vec!["billing".to_string(), "invoice".to_string()];

        let selected = select_candidates(&files, &keywords, 8);
        assert_eq!(
            selected,
            vec!["src/billing/invoice.rs", "src/billing/mod.rs", "src/Invoice.rs"]
        );

        let capped = select_candidates(&files, &keywords, 1);
        assert_eq!(capped, vec!["src/billing/invoice.rs"]);
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let excerpt = FileExcerpt::truncated("a.txt", "héllo wörld", 4);
        assert_eq!(excerpt.content, "héll");
        let whole = FileExcerpt::truncated("a.txt", "short", 100);
        assert_eq!(whole.content, "short");
    }

    #[test]
    fn parse_locations_tolerates_prose_and_garbage() {
        let parsed = parse_locations(
            "Found one:\n[{\"file_path\":\"a.rs\",\"start_line\":1,\"end_line\":3,\
             \"explanation\":\"x\"}]",
        );
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].file_path, "a.rs");

        assert!(parse_locations("[not json]").is_empty());
        assert!(parse_locations("nothing").is_empty());
    }

    #[test]
    fn parse_locations_keeps_valid_entries_next_to_malformed_ones() {
        let reply = r#"[
            {"file_path": "src/tot.rs", "start_line": 10, "end_line": 20, "explanation": "sums"},
            {"file_path": "src/export.rs", "start_line": null, "end_line": 5, "explanation": "csv"},
            {"file_path": "src/tax.rs", "start_line": -3, "end_line": 4.5, "explanation": "rates"},
            {"file_path": "src/mail.rs", "start_line": 1, "end_line": 2}
        ]"#;

        let parsed = parse_locations(reply);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].file_path, "src/tot.rs");
        assert_eq!((parsed[0].start_line, parsed[0].end_line), (10, 20));
    }

    #[tokio::test]
    async fn no_candidates_yields_empty_result_without_reasoning_call() {
        let repository = Arc::new(StubRepository {
            files: Vec::new(),
            contents: HashMap::new(),
        });
        let reasoning = Arc::new(RecordingReasoning::default());
        let searcher = CodeSearcher::new(repository, Some(reasoning.clone()));

        let locations = searcher.analyze(&ticket()).await.unwrap();
        assert!(locations.is_empty());
        assert!(reasoning.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped_and_excerpts_bounded() {
        let mut contents = HashMap::new();
        contents.insert("src/billing/invoice.rs".to_string(), "x".repeat(50));
        let repository = Arc::new(StubRepository {
            files: vec!["src/billing/invoice.rs".to_string(), "src/billing/secret.bin".to_string()],
            contents,
        });
        let reasoning = Arc::new(RecordingReasoning::default());
        let searcher =
            CodeSearcher::new(repository, Some(reasoning.clone())).with_limits(SearchLimits {
                max_files: 8,
                max_file_chars: 10,
                max_listing: 500,
            });

        let locations = searcher.analyze(&ticket()).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].start_line, 10);

        let prompts = reasoning.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(&format!("{}\n", "x".repeat(10))));
        assert!(!prompts[0].contains(&"x".repeat(11)));
        assert!(!prompts[0].contains("secret.bin"));
    }

    #[tokio::test]
    async fn excerpts_without_reasoning_are_not_configured() {
        let mut contents = HashMap::new();
        contents.insert("src/billing/invoice.rs".to_string(), "fn main() {}".to_string());
        let repository = Arc::new(StubRepository {
            files: vec!["src/billing/invoice.rs".to_string()],
            contents,
        });
        let searcher = CodeSearcher::new(repository, None);

        let err = searcher.analyze(&ticket()).await.unwrap_err();
        assert!(matches!(err, AiError::NotConfigured(_)));
    }
}
