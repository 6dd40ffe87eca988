//! Mock backends
//!
//! Deterministic stand-ins for the model services, used by the `--mock` CLI
//! mode and by the pipeline tests. Both count their calls so tests can
//! assert that resumed runs skip completed stages.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::image::ImageBackend;
use super::llm::{LlmBackend, TokenUsage};
use crate::error::BackendError;

const MOCK_OUTLINE: &str = "\
1. Introduction
2. Core Concepts
3. Architecture and Design
4. Putting It Into Practice
5. Where To Go Next";

pub struct MockLlmBackend {
    calls: AtomicU32,
    usage: Mutex<TokenUsage>,
}

impl MockLlmBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Number of generate calls served by this instance.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn chapter_body(prompt: &str) -> String {
        // Pull the chapter number out of the prompt so output is stable per
        // chapter but distinct across chapters.
        let number = prompt
            .split_whitespace()
            .find_map(|w| w.trim_end_matches(&[':', ',', '.'][..]).parse::<u32>().ok())
            .unwrap_or(1);

        format!(
            "### Overview\n\n\
             This section number {number} introduces the material step by step. \
             Each concept builds on the previous one with worked examples.\n\n\
             ### Key Ideas\n\n\
             The central idea of part {number} is that systems grow from small, \
             well-understood pieces. Readers are encouraged to follow along.\n\n\
             ### Summary\n\n\
             Section {number} closed the loop on its topic and prepared the \
             ground for what follows."
        )
    }
}

impl Default for MockLlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    async fn generate(&self, prompt: &str, _system_prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let lowered = prompt.to_lowercase();
        let response = if lowered.contains("outline") || lowered.contains("table of contents") {
            MOCK_OUTLINE.to_string()
        } else {
            Self::chapter_body(prompt)
        };

        let input_tokens = prompt.split_whitespace().count() as u64 * 2;
        let output_tokens = response.split_whitespace().count() as u64 * 2;
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(input_tokens, output_tokens);
        }

        Ok(response)
    }

    fn usage(&self) -> TokenUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    fn name(&self) -> String {
        "mock-llm".to_string()
    }
}

pub struct MockImageBackend {
    calls: AtomicU32,
}

impl MockImageBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockImageBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageBackend for MockImageBackend {
    async fn generate(&self, _prompt: &str, size: (u32, u32)) -> Result<Vec<u8>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (width, height) = size;
        let img = image::RgbImage::from_fn(width, height, |_, y| {
            let t = y as f32 / height.max(1) as f32;
            image::Rgb([
                (50.0 + t * 100.0) as u8,
                (80.0 + t * 80.0) as u8,
                (120.0 + t * 60.0) as u8,
            ])
        });

        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| BackendError::MalformedResponse {
                backend: self.name(),
                reason: e.to_string(),
            })?;

        Ok(bytes)
    }

    fn name(&self) -> String {
        "mock-image".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn llm_outline_is_parseable_and_counted() {
        let backend = MockLlmBackend::new();
        let outline = backend
            .generate("Write the outline for a book", "")
            .await
            .unwrap();
        assert!(outline.starts_with("1. Introduction"));
        assert_eq!(backend.call_count(), 1);
        assert!(!backend.usage().is_zero());
    }

    #[tokio::test]
    async fn image_produces_png_bytes() {
        let backend = MockImageBackend::new();
        let bytes = backend.generate("a cover", (64, 64)).await.unwrap();
        // PNG signature
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
        assert_eq!(backend.call_count(), 1);
    }
}
