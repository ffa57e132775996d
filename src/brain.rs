//! Decision service: asks a chat-completions model for the next step.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::DecisionConfig;
use crate::error::DecisionError;
use crate::types::{ChatMessage, Decision};

#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, messages: &[ChatMessage]) -> Result<Decision, DecisionError>;
}

/// OpenAI-compatible chat-completions client.
pub struct Brain {
    client: Client,
    config: DecisionConfig,
}

impl Brain {
    pub fn new(config: DecisionConfig) -> Result<Self, DecisionError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl DecisionService for Brain {
    async fn decide(&self, messages: &[ChatMessage]) -> Result<Decision, DecisionError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            warn!(status = status.as_u16(), %message, "decision service returned an error");
            return Err(DecisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content = extract_content(&body)?;
        debug!(content, "model replied");
        parse_decision(content)
    }
}

fn extract_content(body: &serde_json::Value) -> Result<&str, DecisionError> {
    let choices = body["choices"].as_array().ok_or(DecisionError::Empty)?;
    let first = choices.first().ok_or(DecisionError::Empty)?;
    first["message"]["content"]
        .as_str()
        .ok_or_else(|| DecisionError::Malformed(format!("no content in response: {body}")))
}

/// Parse the model's reply. Markdown fences are stripped, then the JSON
/// object between the first `{` and the last `}` is decoded.
pub fn parse_decision(content: &str) -> Result<Decision, DecisionError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let (start, end) = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => {
            return Err(DecisionError::Malformed(format!(
                "no JSON object in reply: {cleaned}"
            )));
        }
    };

    serde_json::from_str(&cleaned[start..=end])
        .map_err(|e| DecisionError::Malformed(format!("{e}: {cleaned}")))
}
