//! Error taxonomy for the request pipeline.
//!
//! Only [`UpstreamError`] is fatal to a run. Tool and session errors are
//! recovered where they occur and surface in the step trace or the logs.

use thiserror::Error;

use crate::core::safety::SafetyViolation;

/// A single tool step failed. Absorbed by the executor and recorded in the trace.
#[derive(Debug, Clone, Error)]
pub enum ToolInvocationError {
    #[error("Unknown tool '{tool}' on server '{server}'")]
    UnknownTool { server: String, tool: String },

    #[error("Tool '{server}.{tool}' timed out after {seconds}s")]
    Timeout {
        server: String,
        tool: String,
        seconds: u64,
    },

    #[error("Tool '{server}.{tool}' failed: {message}")]
    Failed {
        server: String,
        tool: String,
        message: String,
    },

    #[error("Tool '{server}.{tool}' rejected parameters: {message}")]
    InvalidParams {
        server: String,
        tool: String,
        message: String,
    },

    #[error(transparent)]
    Limit(#[from] SafetyViolation),
}

impl ToolInvocationError {
    pub fn failed(server: &str, tool: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            server: server.to_string(),
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_params(server: &str, tool: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            server: server.to_string(),
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// A tool server did not answer its liveness probe or catalogue request.
#[derive(Debug, Clone, Error)]
#[error("Tool server '{server}' unavailable: {reason}")]
pub struct RegistryUnavailableError {
    pub server: String,
    pub reason: String,
}

impl RegistryUnavailableError {
    pub fn new(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            reason: reason.into(),
        }
    }
}

/// The language-model call failed. The only error that aborts a run.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("Gemini API URL not configured.")]
    NotConfigured,

    #[error("Invalid model identifier: {0:?}")]
    InvalidModel(String),

    #[error("Language model request failed: {0}")]
    Transport(String),

    #[error("Language model timed out after {0}s")]
    Timeout(u64),

    #[error("Gemini API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed language model response: {0}")]
    MalformedResponse(String),
}

/// Masking or unmasking referenced a session the store does not hold.
#[derive(Debug, Clone, Error)]
#[error("Session not found: {session_id}")]
pub struct SessionNotFoundError {
    pub session_id: String,
}

impl SessionNotFoundError {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

/// Failure of a whole `process` call.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The inbound prompt violated a safety limit; nothing ran.
    #[error("Request rejected: {0}")]
    Rejected(#[from] SafetyViolation),

    /// The language-model call failed; no partial result is returned.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_not_configured_message() {
        assert_eq!(
            UpstreamError::NotConfigured.to_string(),
            "Gemini API URL not configured."
        );
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolInvocationError::failed("text-utils", "append", "boom");
        assert_eq!(err.to_string(), "Tool 'text-utils.append' failed: boom");
    }

    #[test]
    fn test_process_error_from_upstream() {
        let err: ProcessError = UpstreamError::Timeout(30).into();
        assert!(matches!(err, ProcessError::Upstream(UpstreamError::Timeout(30))));
    }
}
