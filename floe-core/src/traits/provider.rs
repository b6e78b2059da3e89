//! ABOUTME: LLM provider capability and factory traits
//! ABOUTME: Providers are registered by model name and generate completions

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A provider completion: generated text plus usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// LLM provider capability: `generate(prompt, config) → {text, usage}`.
///
/// Provider failures are reported as `Provider` errors with a `transient`
/// flag; only transient failures are retried by default policies.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model this instance serves.
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, config: &Map<String, Value>) -> Result<Completion>;
}

/// Factory producing fresh provider instances, resolved by model name.
pub trait ProviderFactory: Send + Sync {
    fn model(&self) -> &str;

    fn instantiate(&self) -> anyhow::Result<Arc<dyn LlmProvider>>;

    /// Stable content identity used for idempotent re-registration checks.
    fn fingerprint(&self) -> String;
}
