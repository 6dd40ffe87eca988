//! Image generation backend trait

use async_trait::async_trait;

use crate::error::BackendError;

/// Image generation capability. Returns encoded PNG bytes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate(&self, prompt: &str, size: (u32, u32)) -> Result<Vec<u8>, BackendError>;

    /// Backend identifier, e.g. `stable-diffusion`.
    fn name(&self) -> String;
}
