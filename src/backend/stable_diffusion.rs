//! Stable Diffusion backend
//!
//! Image generation through a local Stable Diffusion WebUI running with
//! `--api`. Images come back base64-encoded in the JSON payload.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

use super::image::ImageBackend;
use crate::error::BackendError;

const DEFAULT_BASE_URL: &str = "http://localhost:7860";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, watermark, text errors";

pub struct StableDiffusionBackend {
    client: reqwest::Client,
    base_url: String,
}

impl StableDiffusionBackend {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Server from `SD_BASE_URL`, defaulting to the local WebUI port.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("SD_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }
}

#[async_trait]
impl ImageBackend for StableDiffusionBackend {
    async fn generate(&self, prompt: &str, size: (u32, u32)) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/sdapi/v1/txt2img", self.base_url);

        let payload = serde_json::json!({
            "prompt": prompt,
            "negative_prompt": NEGATIVE_PROMPT,
            "width": size.0,
            "height": size.1,
            "steps": 30,
            "cfg_scale": 7,
            "sampler_name": "DPM++ 2M Karras",
        });

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
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
                        url: self.base_url.clone(),
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
        struct Txt2ImgResponse {
            #[serde(default)]
            images: Vec<String>,
        }

        let data: Txt2ImgResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse {
                    backend: self.name(),
                    reason: e.to_string(),
                })?;

        let encoded = data
            .images
            .first()
            .ok_or_else(|| BackendError::MalformedResponse {
                backend: self.name(),
                reason: "no images in response".to_string(),
            })?;

        BASE64
            .decode(encoded)
            .map_err(|e| BackendError::MalformedResponse {
                backend: self.name(),
                reason: format!("invalid base64 image data: {e}"),
            })
    }

    fn name(&self) -> String {
        "stable-diffusion".to_string()
    }
}
