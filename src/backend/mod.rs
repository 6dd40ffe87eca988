//! Generation backends
//!
//! Capability traits for text and image generation plus the concrete
//! adapters: Ollama (local text), Claude (hosted text), Stable Diffusion
//! (local image) and deterministic mocks. Backends are selected by the
//! configuration tag through the factory functions here; an unknown tag is
//! a configuration error at startup, not at first use.

pub mod claude;
pub mod image;
pub mod llm;
pub mod mock;
pub mod ollama;
pub mod retry;
pub mod stable_diffusion;

use std::sync::Arc;

pub use image::ImageBackend;
pub use llm::{LlmBackend, TokenUsage};
pub use retry::{with_retry, RetryPolicy};

use crate::error::ConfigError;

/// Build the text backend for a configuration tag.
pub fn create_llm_backend(tag: &str) -> Result<Arc<dyn LlmBackend>, ConfigError> {
    match tag.to_lowercase().as_str() {
        "ollama" => Ok(Arc::new(ollama::OllamaBackend::from_env())),
        "claude" => Ok(Arc::new(claude::ClaudeBackend::from_env()?)),
        "mock" => Ok(Arc::new(mock::MockLlmBackend::new())),
        other => Err(ConfigError::UnknownBackend {
            kind: "llm",
            tag: other.to_string(),
            supported: "ollama, claude, mock",
        }),
    }
}

/// Build the image backend for a configuration tag.
pub fn create_image_backend(tag: &str) -> Result<Arc<dyn ImageBackend>, ConfigError> {
    match tag.to_lowercase().as_str() {
        "stable_diffusion" | "sd" => Ok(Arc::new(
            stable_diffusion::StableDiffusionBackend::from_env(),
        )),
        "mock" => Ok(Arc::new(mock::MockImageBackend::new())),
        other => Err(ConfigError::UnknownBackend {
            kind: "image",
            tag: other.to_string(),
            supported: "stable_diffusion, mock",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_resolve() {
        assert_eq!(create_llm_backend("mock").unwrap().name(), "mock-llm");
        assert_eq!(create_llm_backend("OLLAMA").unwrap().name(), "ollama/llama3.1");
        assert_eq!(create_image_backend("mock").unwrap().name(), "mock-image");
        assert_eq!(
            create_image_backend("sd").unwrap().name(),
            "stable-diffusion"
        );
    }

    #[test]
    fn unknown_tags_rejected() {
        assert!(matches!(
            create_llm_backend("gpt4"),
            Err(ConfigError::UnknownBackend { kind: "llm", .. })
        ));
        assert!(matches!(
            create_image_backend("dalle"),
            Err(ConfigError::UnknownBackend { kind: "image", .. })
        ));
    }
}
