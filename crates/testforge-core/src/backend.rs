//! Generative backend abstraction.
//!
//! Implementations must tag failures so the orchestrator can decide
//! whether to retry: [`Error::Transient`] for rate limits, timeouts and
//! 5xx-equivalents, [`Error::Permanent`] for authentication failures and
//! rejected requests, [`Error::MalformedResponse`] when the provider's
//! own envelope cannot be read.
//!
//! [`Error::Transient`]: crate::error::Error::Transient
//! [`Error::Permanent`]: crate::error::Error::Permanent
//! [`Error::MalformedResponse`]: crate::error::Error::MalformedResponse

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: None,
        }
    }
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Send `prompt` and return the model's raw text reply.
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}
