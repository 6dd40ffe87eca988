//! Claude backend
//!
//! Hosted text generation through the Anthropic Messages API. Requires
//! `ANTHROPIC_API_KEY`; its absence is a configuration error raised before
//! any stage runs. Token usage comes from the API response, so cost
//! estimates for this backend are exact.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::llm::{LlmBackend, TokenUsage};
use crate::error::{BackendError, ConfigError};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ClaudeBackend {
    api_key: String,
    client: reqwest::Client,
    model: String,
    usage: Mutex<TokenUsage>,
}

impl ClaudeBackend {
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::with_model(api_key, &model)
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.to_string(),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Create from environment variables. Fails fast when the credential is
    /// missing so no stage ever starts with an unusable backend.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").map_err(|_| ConfigError::MissingCredential {
                backend: "claude".to_string(),
                hint: "set ANTHROPIC_API_KEY in the environment or a .env file".to_string(),
            })?;
        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String, BackendError> {
        let system = if system_prompt.is_empty() {
            "You are a helpful assistant."
        } else {
            system_prompt
        };

        let response = self
            .client
            .post(API_URL)
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": &self.model,
                "max_tokens": MAX_TOKENS,
                "system": system,
                "messages": [{"role": "user", "content": prompt}]
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        backend: self.name(),
                    }
                } else {
                    BackendError::Connection {
                        backend: self.name(),
                        url: API_URL.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                backend: self.name(),
                status,
                body,
            });
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct Usage {
            input_tokens: u64,
            output_tokens: u64,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
            usage: Usage,
        }

        let api_response: ApiResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse {
                    backend: self.name(),
                    reason: e.to_string(),
                })?;

        if let Ok(mut usage) = self.usage.lock() {
            usage.add(
                api_response.usage.input_tokens,
                api_response.usage.output_tokens,
            );
        }

        api_response
            .content
            .first()
            .and_then(|c| c.text.clone())
            .ok_or_else(|| BackendError::MalformedResponse {
                backend: self.name(),
                reason: "empty content".to_string(),
            })
    }

    fn usage(&self) -> TokenUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    fn name(&self) -> String {
        format!("claude/{}", self.model)
    }
}
