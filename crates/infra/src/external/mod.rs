//! HTTP clients for the services the job handlers call.
//!
//! - `AnthropicClient`: reasoning service (Messages API)
//! - `GitHubRepository` / `BitbucketRepository`: source listing and file content

mod anthropic;
mod bitbucket;
mod github;

pub use anthropic::AnthropicClient;
pub use bitbucket::BitbucketRepository;
pub use github::GitHubRepository;

use std::time::Duration;

use ticketdesk_ai::AiError;

const USER_AGENT: &str = concat!("ticketdesk-worker/", env!("CARGO_PKG_VERSION"));

fn http_client() -> Result<reqwest::Client, AiError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AiError::NotConfigured(format!("failed to build http client: {e}")))
}

/// Percent-encode each path segment, keeping the `/` separators.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
