// Minimal client for OpenAI-compatible chat completion endpoints.
// Shared by the vision analyzer and the translator; no retries, no streaming.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::errors::ModelError;

#[derive(Clone)]
pub struct ChatClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(content: MessageContent) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<serde_json::Value>,
}

impl ChatClient {
    pub fn new(provider: &ProviderConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(provider.request_timeout_secs))
            .connect_timeout(Duration::from_secs(provider.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/chat/completions", provider.api_base.trim_end_matches('/')),
            api_key: provider.api_key.clone(),
        })
    }

    /// Sends one completion request and returns the trimmed text of the first choice.
    pub async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, ModelError> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Chat completion for {} failed with {}: {}", request.model, status, body);
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        debug!(
            "Chat completion for {} answered in {:.2}s",
            request.model,
            start.elapsed().as_secs_f64()
        );

        extract_content(&body)
    }
}

/// Pulls `choices[0].message.content` out of a completion body.
pub(crate) fn extract_content(body: &str) -> Result<String, ModelError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

    let choice = parsed.choices.into_iter().next().ok_or(ModelError::EmptyChoices)?;
    let content = choice
        .message
        .and_then(|message| message.content)
        .ok_or(ModelError::EmptyContent)?;

    let text = match content {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => return Err(ModelError::EmptyContent),
        // Some gateways answer with content parts instead of a plain string
        serde_json::Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect();
            if texts.is_empty() {
                return Err(ModelError::UnrecognizedContent("no text parts".to_string()));
            }
            texts.join("\n")
        }
        other => return Err(ModelError::UnrecognizedContent(other.to_string())),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(ModelError::EmptyContent);
    }
    Ok(text.to_string())
}
