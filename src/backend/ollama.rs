//! Ollama backend
//!
//! Local text generation through an Ollama server. No credential required.
//! Ollama's generate endpoint does not report token counts, so usage is
//! estimated from character length.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::llm::{LlmBackend, TokenUsage};
use crate::error::BackendError;

const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    base_url: String,
    usage: Mutex<TokenUsage>,
}

impl OllamaBackend {
    pub fn new(model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            model,
            base_url,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Model from `OLLAMA_MODEL`, server from `OLLAMA_BASE_URL`, with local
    /// defaults for both.
    pub fn from_env() -> Self {
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(model, base_url)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout {
                backend: self.name(),
            }
        } else {
            BackendError::Connection {
                backend: self.name(),
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        }
    }

    /// Probe the server. Used by callers that want to fail fast before a
    /// long generation run.
    pub async fn check_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Names of the models the server has pulled.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        #[derive(Deserialize)]
        struct ModelEntry {
            name: String,
        }
        #[derive(Deserialize)]
        struct TagsResponse {
            #[serde(default)]
            models: Vec<ModelEntry>,
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::Api {
                backend: self.name(),
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let tags: TagsResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse {
                    backend: self.name(),
                    reason: e.to_string(),
                })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.base_url);

        let mut payload = serde_json::json!({
            "model": &self.model,
            "prompt": prompt,
            "stream": false,
        });
        if !system_prompt.is_empty() {
            payload["system"] = serde_json::Value::String(system_prompt.to_string());
        }

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

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
        struct GenerateResponse {
            #[serde(default)]
            response: String,
        }

        let data: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse {
                    backend: self.name(),
                    reason: e.to_string(),
                })?;

        // Character-count estimate, ~4 chars per token.
        let input_tokens = (prompt.len() / 4) as u64;
        let output_tokens = (data.response.len() / 4) as u64;
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(input_tokens, output_tokens);
        }

        Ok(data.response)
    }

    fn usage(&self) -> TokenUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }
}
