use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use ticketdesk_ai::{AiError, SourceRepository};

use super::encode_path;

const API_BASE: &str = "https://api.bitbucket.org/2.0";

/// Directory depth the `src` listing descends to; without it only the root is listed.
const LISTING_MAX_DEPTH: u32 = 20;

/// Bitbucket Cloud repository read through the 2.0 API with an access token.
pub struct BitbucketRepository {
    client: reqwest::Client,
    token: String,
    workspace: String,
    repo: String,
}

impl BitbucketRepository {
    pub fn new(
        token: impl Into<String>,
        workspace: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: super::http_client()?,
            token: token.into(),
            workspace: workspace.into(),
            repo: repo.into(),
        })
    }

    async fn get(&self, url: &str, what: &str) -> Result<reqwest::Response, AiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AiError::Repository(format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Repository(format!("{what}: {} {body}", status.as_u16())));
        }
        Ok(response)
    }

    fn listing_url(&self) -> String {
        format!(
            "{API_BASE}/repositories/{}/{}/src/HEAD/?pagelen=100&max_depth={LISTING_MAX_DEPTH}",
            self.workspace, self.repo
        )
    }
}

#[async_trait]
impl SourceRepository for BitbucketRepository {
    async fn list_files(&self, max_files: usize) -> Result<Vec<String>, AiError> {
        let mut files = Vec::new();
        let mut next = Some(self.listing_url());

        while let Some(url) = next.take() {
            if files.len() >= max_files {
                break;
            }
            let page: Value = self
                .get(&url, "listing repository")
                .await?
                .json()
                .await
                .map_err(|e| AiError::Repository(format!("listing repository: {e}")))?;

            let (paths, following) = parse_page(&page);
            files.extend(paths);
            next = following;
            debug!(listed = files.len(), more = next.is_some(), "bitbucket listing page");
        }

        files.truncate(max_files);
        Ok(files)
    }

    async fn file_content(&self, path: &str) -> Result<String, AiError> {
        let url = format!(
            "{API_BASE}/repositories/{}/{}/src/HEAD/{}",
            self.workspace,
            self.repo,
            encode_path(path)
        );
        let what = format!("fetching {path}");
        self.get(&url, &what)
            .await?
            .text()
            .await
            .map_err(|e| AiError::Repository(format!("{what}: {e}")))
    }

    fn file_url(&self, path: &str, start_line: u32, end_line: u32) -> Option<String> {
        Some(format!(
            "https://bitbucket.org/{}/{}/src/HEAD/{}#lines-{start_line}:{end_line}",
            self.workspace,
            self.repo,
            encode_path(path)
        ))
    }
}

/// File paths on one listing page and the URL of the next page.
fn parse_page(page: &Value) -> (Vec<String>, Option<String>) {
    let paths = page["values"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|item| item["type"] == "commit_file")
        .filter_map(|item| item["path"].as_str().map(str::to_string))
        .collect();
    let next = page["next"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    (paths, next)
}
