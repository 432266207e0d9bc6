//! Tool Registry
//!
//! Read-mostly catalogue of every tool offered by the configured servers.
//! Refresh builds a fresh immutable snapshot and swaps it in; in-flight
//! invocations keep the snapshot they started with. Every health check is
//! followed by a refresh, so servers that come up or go down are reflected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ToolCall, ToolHandler, ToolServer};
use crate::domain::{HealthReport, HealthStatus, ServerHealth, Tool};
use crate::error::{RegistryUnavailableError, ToolInvocationError};

/// Default bound on a single probe or catalogue fetch
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable catalogue snapshot
#[derive(Default)]
struct Catalogue {
    /// Tools in server registration order, then server-declared order
    tools: Vec<Tool>,
    handlers: HashMap<(String, String), Arc<dyn ToolHandler>>,
}

impl Catalogue {
    fn handler(&self, server: &str, tool: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers
            .get(&(server.to_string(), tool.to_string()))
            .cloned()
    }
}

/// Registry of tool servers and their tools
pub struct ToolRegistry {
    servers: Vec<Arc<dyn ToolServer>>,
    snapshot: ArcSwap<Catalogue>,
    last_health: ArcSwap<HealthReport>,
    probe_timeout: Duration,
}

impl ToolRegistry {
    /// Create a registry over the given servers. The catalogue is empty until
    /// [`refresh`](Self::refresh) runs.
    pub fn new(servers: Vec<Arc<dyn ToolServer>>) -> Self {
        Self {
            servers,
            snapshot: ArcSwap::from_pointee(Catalogue::default()),
            last_health: ArcSwap::from_pointee(HealthReport::unknown()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Create a registry and load its catalogue
    pub async fn connect(servers: Vec<Arc<dyn ToolServer>>) -> Self {
        let registry = Self::new(servers);
        registry.refresh().await;
        registry
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Names of the configured servers, in registration order
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Rebuild the catalogue from every server and swap it in.
    ///
    /// A server whose catalogue cannot be fetched contributes no tools.
    /// Returns the number of tools in the new snapshot.
    pub async fn refresh(&self) -> usize {
        let fetches = self.servers.iter().map(|server| {
            let server = Arc::clone(server);
            let limit = self.probe_timeout;
            async move {
                let result = match tokio::time::timeout(limit, server.tools()).await {
                    Ok(result) => result,
                    Err(_) => Err(RegistryUnavailableError::new(
                        server.name(),
                        format!("catalogue request timed out after {}ms", limit.as_millis()),
                    )),
                };
                (server, result)
            }
        });

        let mut catalogue = Catalogue::default();
        for (server, result) in join_all(fetches).await {
            let handlers = match result {
                Ok(handlers) => handlers,
                Err(err) => {
                    warn!(server = server.name(), error = %err, "Dropping tools of unavailable server");
                    continue;
                }
            };
            for handler in handlers {
                let tool = handler.descriptor().clone();
                let key = (server.name().to_string(), tool.name.clone());
                if catalogue.handlers.contains_key(&key) {
                    warn!(server = %key.0, tool = %key.1, "Duplicate tool ignored");
                    continue;
                }
                catalogue.handlers.insert(key, handler);
                catalogue.tools.push(tool);
            }
        }

        let count = catalogue.tools.len();
        self.snapshot.store(Arc::new(catalogue));
        info!(tools = count, servers = self.servers.len(), "Tool catalogue refreshed");
        count
    }

    /// Current catalogue. Empty is a valid state.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.snapshot.load().tools.clone()
    }

    /// Whether `(server, tool)` is in the current catalogue
    pub fn contains(&self, server: &str, tool: &str) -> bool {
        self.snapshot.load().handler(server, tool).is_some()
    }

    /// Probe every server concurrently and fold the outcomes into one report.
    ///
    /// An unreachable server degrades the status; the call itself never fails.
    /// The catalogue is rebuilt afterwards.
    pub async fn health_check(&self) -> HealthReport {
        let probes = self.servers.iter().map(|server| {
            let server = Arc::clone(server);
            let limit = self.probe_timeout;
            async move {
                let outcome = match tokio::time::timeout(limit, server.probe()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RegistryUnavailableError::new(
                        server.name(),
                        format!("probe timed out after {}ms", limit.as_millis()),
                    )),
                };
                match outcome {
                    Ok(()) => ServerHealth {
                        name: server.name().to_string(),
                        status: HealthStatus::Healthy,
                        detail: None,
                    },
                    Err(err) => {
                        warn!(server = server.name(), error = %err, "Tool server unreachable");
                        ServerHealth {
                            name: server.name().to_string(),
                            status: HealthStatus::Unreachable,
                            detail: Some(err.reason),
                        }
                    }
                }
            }
        });

        let report = HealthReport::from_servers(join_all(probes).await);
        debug!(status = %report.status, detail = %report.detail, "Health check complete");
        self.last_health.store(Arc::new(report.clone()));
        self.refresh().await;
        report
    }

    /// Most recent health report, `unknown` if no check has run
    pub fn last_health(&self) -> HealthReport {
        self.last_health.load().as_ref().clone()
    }

    /// Invoke one tool with a time bound
    pub async fn invoke(
        &self,
        server: &str,
        tool: &str,
        call: ToolCall,
        timeout: Duration,
    ) -> Result<String, ToolInvocationError> {
        let handler = self.snapshot.load().handler(server, tool).ok_or_else(|| {
            ToolInvocationError::UnknownTool {
                server: server.to_string(),
                tool: tool.to_string(),
            }
        })?;

        let start = Instant::now();
        let result = tokio::time::timeout(timeout, handler.invoke(call))
            .await
            .map_err(|_| ToolInvocationError::Timeout {
                server: server.to_string(),
                tool: tool.to_string(),
                seconds: timeout.as_secs(),
            })?;
        debug!(
            server,
            tool,
            ok = result.is_ok(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool invoked"
        );
        result
    }
}

/// Run a health check every `every` until the returned task is aborted
pub fn spawn_health_monitor(registry: Arc<ToolRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = registry.health_check().await;
            if report.status != HealthStatus::Healthy {
                debug!(status = %report.status, "Tool servers not all healthy");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct UpperTool(Tool);

    #[async_trait]
    impl ToolHandler for UpperTool {
        fn descriptor(&self) -> &Tool {
            &self.0
        }

        async fn invoke(&self, call: ToolCall) -> Result<String, ToolInvocationError> {
            Ok(call.payload.to_uppercase())
        }
    }

    struct SlowTool(Tool);

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn descriptor(&self) -> &Tool {
            &self.0
        }

        async fn invoke(&self, call: ToolCall) -> Result<String, ToolInvocationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(call.payload)
        }
    }

    struct StubServer {
        name: String,
        alive: AtomicBool,
        tools: Mutex<Vec<Arc<dyn ToolHandler>>>,
    }

    impl StubServer {
        fn new(name: &str, tools: Vec<&str>) -> Arc<Self> {
            let tools = tools
                .into_iter()
                .map(|t| {
                    Arc::new(UpperTool(Tool::new(name, t, "uppercase"))) as Arc<dyn ToolHandler>
                })
                .collect();
            Arc::new(Self {
                name: name.to_string(),
                alive: AtomicBool::new(true),
                tools: Mutex::new(tools),
            })
        }
    }

    fn servers(list: Vec<Arc<StubServer>>) -> Vec<Arc<dyn ToolServer>> {
        list.into_iter()
            .map(|s| s as Arc<dyn ToolServer>)
            .collect()
    }

    #[async_trait]
    impl ToolServer for StubServer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn tools(&self) -> Result<Vec<Arc<dyn ToolHandler>>, RegistryUnavailableError> {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(RegistryUnavailableError::new(&self.name, "down"));
            }
            Ok(self.tools.lock().unwrap().clone())
        }

        async fn probe(&self) -> Result<(), RegistryUnavailableError> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RegistryUnavailableError::new(&self.name, "down"))
            }
        }
    }

    #[tokio::test]
    async fn test_empty_registry_is_valid() {
        let registry = ToolRegistry::connect(Vec::new()).await;
        assert!(registry.list_tools().is_empty());
        assert_eq!(registry.last_health().status, HealthStatus::Unknown);
        assert_eq!(registry.health_check().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_catalogue_order_and_invoke() {
        let a = StubServer::new("alpha", vec!["one", "two"]);
        let b = StubServer::new("beta", vec!["three"]);
        let registry = ToolRegistry::connect(servers(vec![a, b])).await;

        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["one", "two", "three"]);

        let out = registry
            .invoke("beta", "three", ToolCall::new("hi", "s"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "HI");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::connect(servers(vec![StubServer::new("alpha", vec!["one"])])).await;
        let err = registry
            .invoke("alpha", "missing", ToolCall::new("x", "s"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let server = StubServer::new("slow", vec![]);
        server
            .tools
            .lock()
            .unwrap()
            .push(Arc::new(SlowTool(Tool::new("slow", "wait", "sleeps"))));
        let registry = ToolRegistry::connect(servers(vec![server])).await;

        let err = registry
            .invoke("slow", "wait", ToolCall::new("x", "s"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_degrades_health() {
        let up = StubServer::new("up", vec!["one"]);
        let down = StubServer::new("down", vec!["two"]);
        down.alive.store(false, Ordering::SeqCst);
        let registry = ToolRegistry::connect(servers(vec![up, down])).await;

        // The unavailable server contributes nothing to the catalogue
        assert_eq!(registry.list_tools().len(), 1);

        let report = registry.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.servers[1].status, HealthStatus::Unreachable);
        assert_eq!(registry.last_health(), report);
    }

    #[tokio::test]
    async fn test_refresh_swaps_snapshot() {
        let server = StubServer::new("alpha", vec!["one"]);
        let registry = ToolRegistry::connect(servers(vec![server.clone()])).await;
        assert!(registry.contains("alpha", "one"));

        let replacement: Arc<dyn ToolHandler> = Arc::new(UpperTool(Tool::new("alpha", "two", "")));
        *server.tools.lock().unwrap() = vec![replacement];
        assert_eq!(registry.refresh().await, 1);
        assert!(!registry.contains("alpha", "one"));
        assert!(registry.contains("alpha", "two"));
    }

    #[tokio::test]
    async fn test_server_recovery_loads_its_tools() {
        let late = StubServer::new("late", vec!["one"]);
        late.alive.store(false, Ordering::SeqCst);
        let registry = ToolRegistry::connect(servers(vec![late.clone()])).await;
        assert!(registry.list_tools().is_empty());

        late.alive.store(true, Ordering::SeqCst);
        let report = registry.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(registry.contains("late", "one"));

        // Going down again drops its tools
        late.alive.store(false, Ordering::SeqCst);
        registry.health_check().await;
        assert!(registry.list_tools().is_empty());
    }

    #[tokio::test]
    async fn test_health_monitor_refreshes_catalogue() {
        let late = StubServer::new("late", vec!["one"]);
        late.alive.store(false, Ordering::SeqCst);
        let registry = Arc::new(
            ToolRegistry::new(servers(vec![late.clone()]))
                .with_probe_timeout(Duration::from_millis(200)),
        );
        registry.refresh().await;

        late.alive.store(true, Ordering::SeqCst);
        let monitor = spawn_health_monitor(registry.clone(), Duration::from_millis(10));
        let mut loaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if registry.contains("late", "one") {
                loaded = true;
                break;
            }
        }
        monitor.abort();
        assert!(loaded);
        assert_eq!(registry.last_health().status, HealthStatus::Healthy);
    }
}
