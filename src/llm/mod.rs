//! Language-model clients.
//!
//! The orchestrator only sees the [`LanguageModel`] trait. Retries are the
//! client's business; the core never retries a failed call.

pub mod echo;
pub mod gemini;

use async_trait::async_trait;

use crate::error::UpstreamError;

pub use echo::EchoModel;
pub use gemini::GeminiClient;

/// Model used when a request does not name one
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Text generation given a prompt and a model identifier
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Generate a completion for `prompt` using `model`
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, UpstreamError>;
}
