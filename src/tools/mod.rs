//! Tool servers and the registry that dispatches to them.
//!
//! A tool server owns a set of tools and answers a liveness probe. Each tool
//! is a [`ToolHandler`]: a capability object with one uniform `invoke`. The
//! [`ToolRegistry`] maps `(server, tool)` to handlers through an immutable
//! snapshot that is swapped on refresh.

pub mod builtin;
pub mod http;
pub mod registry;

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::Tool;
use crate::error::{RegistryUnavailableError, ToolInvocationError};

pub use builtin::BuiltinServer;
pub use http::HttpToolServer;
pub use registry::{spawn_health_monitor, ToolRegistry};

/// Input handed to a single tool invocation
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Current stage payload
    pub payload: String,

    /// Step parameters from the pipeline document
    pub params: serde_json::Value,

    /// Session threaded through every step of a run
    pub session_id: String,
}

impl ToolCall {
    pub fn new(payload: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            params: serde_json::Value::Null,
            session_id: session_id.into(),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Read a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// A single invocable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Catalogue entry for this tool
    fn descriptor(&self) -> &Tool;

    /// Transform the payload, returning the new payload
    async fn invoke(&self, call: ToolCall) -> Result<String, ToolInvocationError>;
}

/// A named group of tools with a shared liveness probe
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    /// Current tools offered by this server
    async fn tools(&self) -> Result<Vec<Arc<dyn ToolHandler>>, RegistryUnavailableError>;

    /// Liveness probe
    async fn probe(&self) -> Result<(), RegistryUnavailableError>;
}
