//! Tool catalogue entries and tool-server health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tool exposed by a registered server.
///
/// Immutable once registered; the registry swaps in a fresh catalogue on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Owning server name
    pub server: String,

    /// Tool name (unique within its server)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Input contract, opaque to the core
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl Tool {
    pub fn new(
        server: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::Value::Null,
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Aggregate liveness of the configured tool servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every server answered its probe
    Healthy,

    /// At least one server answered and at least one did not
    Degraded,

    /// No server answered
    Unreachable,

    /// No health check has run yet
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl HealthStatus {
    /// Fold per-server probe outcomes into one status.
    ///
    /// Zero configured servers is healthy: an empty catalogue is a valid state.
    pub fn aggregate(reachable: usize, total: usize) -> Self {
        if reachable == total {
            Self::Healthy
        } else if reachable == 0 {
            Self::Unreachable
        } else {
            Self::Degraded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe outcome for a single server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of a registry-wide health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: String,
    pub servers: Vec<ServerHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl HealthReport {
    /// Report used before the first check has completed
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            detail: "health has not been checked yet".to_string(),
            servers: Vec::new(),
            checked_at: None,
        }
    }

    /// Build a report from per-server results
    pub fn from_servers(servers: Vec<ServerHealth>) -> Self {
        let total = servers.len();
        let reachable = servers
            .iter()
            .filter(|s| s.status == HealthStatus::Healthy)
            .count();
        let status = HealthStatus::aggregate(reachable, total);
        Self {
            status,
            detail: format!("{}/{} tool servers reachable", reachable, total),
            servers,
            checked_at: Some(Utc::now()),
        }
    }
}
