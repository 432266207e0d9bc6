//! Remote tool server over JSON/HTTP.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET /health`: any 2xx means alive
//! - `GET /tools`: `[{name, description, inputSchema}]`
//! - `POST /tools/{tool}`: body `{input, params, sessionId}`, reply `{output}`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ToolCall, ToolHandler, ToolServer};
use crate::domain::Tool;
use crate::error::{RegistryUnavailableError, ToolInvocationError};

/// Catalogue entry as served by a remote tool server
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeRequest<'a> {
    input: &'a str,
    params: &'a serde_json::Value,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    output: String,
}

/// Tool server reached over HTTP
pub struct HttpToolServer {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpToolServer {
    /// Create a new client. `timeout` bounds every request to this server.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| format!("Failed to build HTTP client for tool server {}", name))?;
        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> RegistryUnavailableError {
        RegistryUnavailableError::new(&self.name, reason.to_string())
    }
}

#[async_trait]
impl ToolServer for HttpToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn ToolHandler>>, RegistryUnavailableError> {
        let response = self
            .client
            .get(format!("{}/tools", self.base_url))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            return Err(self.unavailable(format!("catalogue returned {}", response.status())));
        }

        let remote: Vec<RemoteTool> = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("invalid catalogue: {}", e)))?;

        Ok(remote
            .into_iter()
            .map(|t| {
                Arc::new(HttpTool {
                    descriptor: Tool::new(&self.name, t.name, t.description)
                        .with_input_schema(t.input_schema),
                    endpoint: format!("{}/tools/", self.base_url),
                    client: self.client.clone(),
                }) as Arc<dyn ToolHandler>
            })
            .collect())
    }

    async fn probe(&self) -> Result<(), RegistryUnavailableError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.unavailable(format!("health returned {}", response.status())))
        }
    }
}

/// One remote tool
struct HttpTool {
    descriptor: Tool,
    /// `{base}/tools/`, the tool name is appended per call
    endpoint: String,
    client: reqwest::Client,
}

#[async_trait]
impl ToolHandler for HttpTool {
    fn descriptor(&self) -> &Tool {
        &self.descriptor
    }

    async fn invoke(&self, call: ToolCall) -> Result<String, ToolInvocationError> {
        let server = self.descriptor.server.as_str();
        let tool = self.descriptor.name.as_str();

        let body = InvokeRequest {
            input: &call.payload,
            params: &call.params,
            session_id: &call.session_id,
        };

        let response = self
            .client
            .post(format!("{}{}", self.endpoint, tool))
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolInvocationError::failed(server, tool, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
            || status == reqwest::StatusCode::BAD_REQUEST
        {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolInvocationError::invalid_params(server, tool, text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolInvocationError::failed(
                server,
                tool,
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: InvokeResponse = response
            .json()
            .await
            .map_err(|e| ToolInvocationError::failed(server, tool, format!("invalid response: {}", e)))?;
        Ok(parsed.output)
    }
}
