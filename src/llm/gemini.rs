//! Gemini `generateContent` client.
//!
//! Endpoint resolution: an explicit API URL is used verbatim; otherwise the
//! URL is built from the API key and the requested model; with neither, every
//! call fails with [`UpstreamError::NotConfigured`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::LanguageModel;
use crate::error::UpstreamError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini REST client
pub struct GeminiClient {
    api_key: Option<String>,
    api_url: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new client
    pub fn new(api_key: Option<String>, api_url: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            api_url: api_url.filter(|u| !u.is_empty()),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Whether a call could be attempted at all
    pub fn is_configured(&self) -> bool {
        self.api_url.is_some() || self.api_key.is_some()
    }

    /// Resolve the request URL for `model`.
    ///
    /// The model becomes a path segment, so it is limited to ASCII
    /// alphanumerics, `.`, `_` and `-`.
    pub fn endpoint(&self, model: &str) -> Result<String, UpstreamError> {
        if let Some(url) = &self.api_url {
            return Ok(url.clone());
        }
        let Some(key) = &self.api_key else {
            return Err(UpstreamError::NotConfigured);
        };
        if !is_model_id(model) {
            return Err(UpstreamError::InvalidModel(model.to_string()));
        }
        Ok(format!("{}/{}:generateContent?key={}", API_BASE, model, key))
    }
}

fn is_model_id(model: &str) -> bool {
    !model.is_empty()
        && model
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Pull the first candidate's text. A well-formed reply without text yields "".
fn extract_text(body: &Value) -> String {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, UpstreamError> {
        let url = self.endpoint(model)?;
        let payload = json!({
            "contents": [{"parts": [{"text": prompt}]}]
        });

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.timeout.as_secs())
                } else {
                    // Drop the URL: it can carry the API key
                    UpstreamError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;
        let output = extract_text(&body);
        debug!(model, chars = output.len(), "Gemini response received");
        Ok(output)
    }
}
