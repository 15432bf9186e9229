// Chat completion client
// Speaks the OpenAI-compatible `/chat/completions` contract over ureq


use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ChatConfig;
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A plain-text message as sent to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Produces a reply for an ordered list of messages
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One completion call. No tool use and no retries.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    endpoint: Url,
    model: String,
    temperature: f32,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl OpenAiChatClient {
    /// Build a client, reading the API key from the configured variable
    #[inline]
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(
                "{} is not set, sending chat requests without an API key",
                config.api_key_env
            );
        }
        Self::with_api_key(config, api_key)
    }

    #[inline]
    pub fn with_api_key(config: &ChatConfig, api_key: Option<String>) -> Result<Self> {
        let base = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("chat/completions"))
            .map_err(|e| {
                RagError::Config(format!("Invalid chat base URL {}: {}", config.base_url, e))
            })?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(config.timeout_seconds.map(Duration::from_secs))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            agent,
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ChatModel for OpenAiChatClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::Chat(format!("Failed to serialize chat request: {}", e)))?;

        debug!(
            "Sending {} messages to {} at {}",
            messages.len(),
            self.model,
            self.endpoint
        );

        let mut builder = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", &format!("Bearer {key}"));
        }

        let mut response = builder
            .send(&request_json)
            .map_err(|e| RagError::Chat(format!("Request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| RagError::Chat(format!("Failed to read chat response: {}", e)))?;

        if !status.is_success() {
            return Err(RagError::Chat(format!(
                "Provider returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let completion: CompletionResponse = serde_json::from_str(&body)
            .map_err(|e| RagError::Chat(format!("Failed to parse chat response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Chat("Provider returned no choices".to_string()))?
            .message
            .content
            .ok_or_else(|| RagError::Chat("Provider returned an empty message".to_string()))?;

        info!("Received {} character answer from {}", content.len(), self.model);
        Ok(content)
    }
}
