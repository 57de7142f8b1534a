//! External completion service
//!
//! The orchestrator only needs "ordered role/content pairs in, text out". The
//! OpenAI-compatible client here is the production implementation; tests plug
//! in their own `CompletionService`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::store::Role;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Missing API key (set completion.api_key or OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("Completion returned no content")]
    EmptyResponse,
}

/// One prompt entry, stripped of store identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<String, CompletionError>;
}

/// Chat-completions client for OpenAI and compatible endpoints
pub struct OpenAiCompletion {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompletion {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = config.api_key().ok_or(CompletionError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_request_body(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<String, CompletionError> {
        let body = self.build_request_body(messages, params);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(CompletionError::Api(format!("HTTP {}: {}", status, text)));
        }

        let completion: ChatCompletion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
