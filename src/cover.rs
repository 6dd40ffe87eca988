//! Cover generation stage
//!
//! Derives a genre-keyed prompt from the configuration and makes one image
//! backend call through the retry loop.

use std::sync::Arc;

use crate::backend::{with_retry, ImageBackend, RetryPolicy};
use crate::config::BookConfig;
use crate::error::BackendError;

/// Cover dimensions requested from the image backend.
pub const COVER_SIZE: (u32, u32) = (1024, 1024);

pub struct CoverDesigner {
    image: Arc<dyn ImageBackend>,
    retry: RetryPolicy,
}

impl CoverDesigner {
    pub fn new(image: Arc<dyn ImageBackend>, retry: RetryPolicy) -> Self {
        Self { image, retry }
    }

    /// Compose the image prompt from genre template, configured style and
    /// title.
    pub fn build_prompt(config: &BookConfig) -> String {
        let style = &config.cover.style;
        let base = match config.genre.to_lowercase().as_str() {
            "technology" => format!(
                "A {style} book cover for a technology book. \
                 Clean, futuristic design with subtle digital circuit patterns and cool-toned gradients. "
            ),
            "business" => format!(
                "A {style} book cover for a business book. \
                 Sophisticated, corporate feel with geometric shapes and warm gold or navy tones. "
            ),
            "fiction" => format!(
                "A {style} book cover for a fiction novel. \
                 Dramatic, cinematic composition with moody lighting and rich colours. "
            ),
            "self-help" => format!(
                "A {style} book cover for a self-help and motivation book. \
                 Bright, inspiring design with sunrise or nature imagery and uplifting energy. "
            ),
            "science" => format!(
                "A {style} book cover for a science book. \
                 Visually striking design with macro-photography style scientific imagery. "
            ),
            _ => format!(
                "A {style} professional book cover. \
                 Clean, modern design suitable for digital publishing. "
            ),
        };

        format!(
            "{base}The words '{}' should appear prominently on the cover in a clean readable font. \
             Professional publishing quality, high resolution, no watermarks.",
            config.title
        )
    }

    /// Generate the cover image. Returns encoded PNG bytes; the orchestrator
    /// persists them.
    pub async fn generate_cover(&self, config: &BookConfig) -> Result<Vec<u8>, BackendError> {
        let prompt = Self::build_prompt(config);
        with_retry(&self.retry, "cover.image", || {
            self.image.generate(&prompt, COVER_SIZE)
        })
        .await
    }
}
