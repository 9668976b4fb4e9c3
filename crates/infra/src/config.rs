//! Environment configuration for the worker.
//!
//! Values are read once at boot. Unset optional values fall back to defaults;
//! values that are set but malformed are errors, so a typo fails the boot
//! instead of silently changing behaviour.

use std::env;
use std::time::Duration;

use ticketdesk_ai::SearchLimits;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-6";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("unknown SOURCE_REPO_PROVIDER {0:?} (expected github or bitbucket)")]
    UnknownProvider(String),
    #[error("{provider} repository selected but {} not set", .missing.join(", "))]
    Incomplete {
        provider: &'static str,
        missing: Vec<&'static str>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRepoConfig {
    GitHub {
        token: String,
        owner: String,
        repo: String,
    },
    Bitbucket {
        token: String,
        workspace: String,
        repo: String,
    },
}

impl SourceRepoConfig {
    pub fn provider(&self) -> &'static str {
        match self {
            SourceRepoConfig::GitHub { .. } => "github",
            SourceRepoConfig::Bitbucket { .. } => "bitbucket",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub poll_interval: Duration,
    /// `None` keeps handlers unbounded.
    pub handler_timeout: Option<Duration>,
    /// `None` selects the heuristic validator and disables code analysis.
    pub anthropic: Option<AnthropicConfig>,
    /// `None` disables code analysis.
    pub source_repo: Option<SourceRepoConfig>,
    pub search_limits: SearchLimits,
}

impl AppConfig {
    /// Read from the process environment (load `.env` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let poll_interval_ms = parse_or(&get, "JOB_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "JOB_POLL_INTERVAL_MS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let handler_timeout = match get("JOB_HANDLER_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("JOB_HANDLER_TIMEOUT_SECS", &raw)?))
                .filter(|d| !d.is_zero()),
            None => None,
        };

        let anthropic = get("ANTHROPIC_API_KEY").map(|api_key| AnthropicConfig {
            api_key,
            model: get("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            base_url: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
        });

        let defaults = SearchLimits::default();
        let search_limits = SearchLimits {
            max_files: parse_or(&get, "CODE_SEARCH_MAX_FILES", defaults.max_files)?,
            max_file_chars: parse_or(&get, "CODE_SEARCH_MAX_FILE_CHARS", defaults.max_file_chars)?,
            max_listing: parse_or(&get, "CODE_SEARCH_MAX_LISTING", defaults.max_listing)?,
        };

        Ok(Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            handler_timeout,
            anthropic,
            source_repo: source_repo(&get)?,
            search_limits,
        })
    }

    /// Log the effective configuration without secrets.
    pub fn log_summary(&self) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            handler_timeout_secs = self.handler_timeout.map(|d| d.as_secs()),
            reasoning = self.anthropic.as_ref().map(|a| a.model.as_str()).unwrap_or("heuristic"),
            source_repo = self
                .source_repo
                .as_ref()
                .map(SourceRepoConfig::provider)
                .unwrap_or("none"),
            max_files = self.search_limits.max_files,
            max_file_chars = self.search_limits.max_file_chars,
            max_listing = self.search_limits.max_listing,
            "configuration loaded"
        );
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn source_repo(
    get: &impl Fn(&str) -> Option<String>,
) -> Result<Option<SourceRepoConfig>, ConfigError> {
    const GITHUB: [&str; 3] = ["GITHUB_TOKEN", "GITHUB_OWNER", "GITHUB_REPO"];
    const BITBUCKET: [&str; 3] = ["BITBUCKET_TOKEN", "BITBUCKET_WORKSPACE", "BITBUCKET_REPO"];

    let read = |provider: &'static str, keys: [&'static str; 3]| {
        let values = keys.map(get);
        let missing: Vec<&'static str> = keys
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        match values {
            [Some(a), Some(b), Some(c)] => Ok([a, b, c]),
            _ => Err(ConfigError::Incomplete { provider, missing }),
        }
    };
    let github =
        |[token, owner, repo]: [String; 3]| SourceRepoConfig::GitHub { token, owner, repo };
    let bitbucket = |[token, workspace, repo]: [String; 3]| SourceRepoConfig::Bitbucket {
        token,
        workspace,
        repo,
    };

    match get("SOURCE_REPO_PROVIDER").map(|p| p.to_ascii_lowercase()) {
        Some(p) if p == "github" => read("github", GITHUB).map(github).map(Some),
        Some(p) if p == "bitbucket" => read("bitbucket", BITBUCKET).map(bitbucket).map(Some),
        Some(other) => Err(ConfigError::UnknownProvider(other)),
        None => Ok(read("github", GITHUB)
            .map(github)
            .or_else(|_| read("bitbucket", BITBUCKET).map(bitbucket))
            .ok()),
    }
}
