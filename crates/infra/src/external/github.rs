use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use ticketdesk_ai::{AiError, SourceRepository};

use super::encode_path;

const API_BASE: &str = "https://api.github.com";

/// GitHub repository read through the REST API with a personal access token.
pub struct GitHubRepository {
    client: reqwest::Client,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubRepository {
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self, AiError> {
        Ok(Self {
            client: super::http_client()?,
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    async fn get_json(&self, url: &str, what: &str) -> Result<Value, AiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| AiError::Repository(format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Repository(format!("{what}: {} {body}", status.as_u16())));
        }

        response
            .json()
            .await
            .map_err(|e| AiError::Repository(format!("{what}: {e}")))
    }
}

#[async_trait]
impl SourceRepository for GitHubRepository {
    async fn list_files(&self, max_files: usize) -> Result<Vec<String>, AiError> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/git/trees/HEAD?recursive=1",
            self.owner, self.repo
        );
        let tree = self.get_json(&url, "listing repository tree").await?;
        Ok(blob_paths(&tree, max_files))
    }

    async fn file_content(&self, path: &str) -> Result<String, AiError> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/contents/{}",
            self.owner,
            self.repo,
            encode_path(path)
        );
        let file = self.get_json(&url, &format!("fetching {path}")).await?;
        decode_content(&file)
    }

    fn file_url(&self, path: &str, start_line: u32, end_line: u32) -> Option<String> {
        Some(format!(
            "https://github.com/{}/{}/blob/HEAD/{}#L{start_line}-L{end_line}",
            self.owner,
            self.repo,
            encode_path(path)
        ))
    }
}

/// Paths of file entries in a recursive tree response.
fn blob_paths(tree: &Value, max_files: usize) -> Vec<String> {
    tree["tree"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|item| item["type"] == "blob")
        .filter_map(|item| item["path"].as_str().map(str::to_string))
        .take(max_files)
        .collect()
}

/// Decode a contents API response. The base64 body is line-wrapped.
fn decode_content(file: &Value) -> Result<String, AiError> {
    let encoded: String = file["content"]
        .as_str()
        .ok_or_else(|| AiError::Repository("contents response has no content".into()))?
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| AiError::Repository(format!("invalid base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|_| AiError::Repository("file is not valid UTF-8".into()))
}
