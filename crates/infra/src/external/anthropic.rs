use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use ticketdesk_ai::{AiError, ReasoningService};

use crate::config::DEFAULT_ANTHROPIC_BASE_URL;

const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AiError> {
        Ok(Self {
            client: super::http_client()?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningService for AnthropicClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        debug!(model = %self.model, max_tokens, "reasoning request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        first_text(&reply)
    }
}

/// Text of the first content block.
fn first_text(reply: &Value) -> Result<String, AiError> {
    reply["content"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AiError::Parse("missing content[0].text".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_text_block() {
        let reply = json!({
            "content": [{ "type": "text", "text": "{\"is_complete\": true}" }],
            "stop_reason": "end_turn",
        });
        assert_eq!(first_text(&reply).unwrap(), "{\"is_complete\": true}");
        assert!(matches!(first_text(&json!({ "content": [] })), Err(AiError::Parse(_))));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = AnthropicClient::new("key", "claude-sonnet-4-6")
            .unwrap()
            .with_base_url("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.model(), "claude-sonnet-4-6");
    }
}
