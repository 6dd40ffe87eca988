//! Text generation backend trait
//!
//! Unified interface over the local (Ollama) and hosted (Claude) model
//! services. Implementations are stateless request/response adapters apart
//! from the per-instance token usage counter.

use std::ops::Sub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Token usage accumulated by a backend instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Add another usage sample in place.
    pub fn add(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.total_tokens = self.input_tokens + self.output_tokens;
    }

    pub fn merge(&mut self, other: TokenUsage) {
        self.add(other.input_tokens, other.output_tokens);
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}

impl Sub for TokenUsage {
    type Output = TokenUsage;

    /// Saturating difference, used to extract the usage incurred between two
    /// snapshots of the same backend instance.
    fn sub(self, earlier: TokenUsage) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens.saturating_sub(earlier.input_tokens),
            self.output_tokens.saturating_sub(earlier.output_tokens),
        )
    }
}

/// Text generation capability.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run one generation call with an optional system prompt.
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String, BackendError>;

    /// Usage accumulated by this instance so far.
    fn usage(&self) -> TokenUsage;

    /// Backend identifier, e.g. `ollama/llama3.1` or
    /// `claude/claude-3-5-sonnet-20241022`. Keys the pricing table.
    fn name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_arithmetic() {
        let mut usage = TokenUsage::default();
        assert!(usage.is_zero());

        usage.add(100, 400);
        usage.add(50, 100);
        assert_eq!(usage.input_tokens, 150);
        assert_eq!(usage.output_tokens, 500);
        assert_eq!(usage.total_tokens, 650);

        let earlier = TokenUsage::new(100, 400);
        let delta = usage - earlier;
        assert_eq!(delta, TokenUsage::new(50, 100));
    }
}
