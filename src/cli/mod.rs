//! Command-line interface for pipeguard.
//!
//! Provides commands for serving the HTTP API, running a single request
//! from stdin, inspecting the tool catalogue and showing configuration.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use crate::config::{self, LlmProvider, ResolvedConfig};
use crate::core::{Orchestrator, PipelineConfig, PipelineWatcher, ProcessRequest, SharedPipeline};
use crate::domain::Stage;
use crate::llm::{EchoModel, GeminiClient, LanguageModel};
use crate::privacy::{spawn_session_sweeper, InMemorySessionStore, PiiMasker, SessionStore};
use crate::server::{self, AppState};
use crate::tools::{spawn_health_monitor, BuiltinServer, HttpToolServer, ToolRegistry, ToolServer};

/// pipeguard - PII-safe tool pipelines around a language model
#[derive(Parser, Debug)]
#[command(name = "pipeguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .pipeguard/config.yaml discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Reload the pipeline document when it changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Process one prompt read from stdin and print the result as JSON
    Process {
        /// Model identifier
        #[arg(short, long)]
        model: Option<String>,

        /// Masking session to reuse
        #[arg(short, long)]
        session: Option<String>,

        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List the tool catalogue
    Tools,

    /// Probe every configured tool server
    Health,

    /// Show resolved configuration (secrets elided)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::init(self.config.as_deref())?;

        match self.command {
            Commands::Serve { bind, watch } => serve(cfg, bind, watch).await,
            Commands::Process {
                model,
                session,
                input,
            } => process(cfg, model, session, input).await,
            Commands::Tools => list_tools(cfg).await,
            Commands::Health => show_health(cfg).await,
            Commands::Config => show_config(cfg),
        }
    }
}

/// Everything a request needs, wired from configuration
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub pipeline: SharedPipeline,
    pub store: Arc<InMemorySessionStore>,
}

impl Runtime {
    /// Build the session store, tool servers, registry, model and orchestrator
    pub async fn build(cfg: &ResolvedConfig) -> Result<Self> {
        let store = Arc::new(InMemorySessionStore::new());
        let masker = PiiMasker::new(store.clone());

        let mut servers: Vec<Arc<dyn ToolServer>> = vec![
            Arc::new(BuiltinServer::pii_handler(masker.clone())),
            Arc::new(BuiltinServer::text_utils()),
        ];
        for remote in &cfg.servers {
            servers.push(Arc::new(HttpToolServer::new(
                remote.name.clone(),
                remote.url.clone(),
                Duration::from_secs(remote.timeout_seconds),
            )?));
        }
        let registry = ToolRegistry::new(servers)
            .with_probe_timeout(Duration::from_secs(cfg.server.probe_timeout_seconds.max(1)));
        registry.refresh().await;
        let registry = Arc::new(registry);

        let llm: Arc<dyn LanguageModel> = match cfg.llm.provider {
            LlmProvider::Gemini => {
                let client = GeminiClient::new(
                    cfg.llm.api_key.clone(),
                    cfg.llm.api_url.clone(),
                    Duration::from_secs(cfg.llm.timeout_seconds),
                );
                if !client.is_configured() {
                    warn!("Gemini is not configured; /process will fail until GEMINI_API_KEY or GEMINI_API_URL is set");
                }
                Arc::new(client)
            }
            LlmProvider::Echo => Arc::new(EchoModel),
        };

        let pipeline = load_pipeline(cfg)?;
        for stage in Stage::ALL {
            for step in pipeline.stage(stage).enabled_steps() {
                if !registry.contains(&step.server, &step.tool) {
                    warn!(
                        %stage,
                        server = %step.server,
                        tool = %step.tool,
                        "Pipeline step names a tool that is not registered"
                    );
                }
            }
        }

        let orchestrator = Orchestrator::new(registry, masker, llm)
            .with_limits(cfg.limits.clone())
            .with_privacy(cfg.privacy.enabled)
            .with_default_model(cfg.llm.model.clone());

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            pipeline: Arc::new(ArcSwap::from_pointee(pipeline)),
            store,
        })
    }
}

/// Load the configured pipeline document, or an empty pipeline when none is set
fn load_pipeline(cfg: &ResolvedConfig) -> Result<PipelineConfig> {
    let Some(path) = cfg.pipeline.as_deref() else {
        info!("No pipeline document configured; stages are empty");
        return Ok(PipelineConfig::default());
    };

    let pipeline = PipelineConfig::from_file(path)?;
    pipeline.validate()?;
    info!(
        steps = pipeline.enabled_step_count(),
        "Loaded pipeline from {}",
        path.display()
    );
    Ok(pipeline)
}

/// Start HTTP server
async fn serve(cfg: &ResolvedConfig, bind: Option<String>, watch: bool) -> Result<()> {
    let runtime = Runtime::build(cfg).await?;

    let watcher = match (watch, cfg.pipeline.as_ref()) {
        (true, Some(path)) => Some(PipelineWatcher::new(path, runtime.pipeline.clone()).watch()?),
        (true, None) => {
            warn!("--watch given but no pipeline document is configured");
            None
        }
        (false, _) => None,
    };

    let store: Arc<dyn SessionStore> = runtime.store.clone();
    let sweeper = spawn_session_sweeper(
        store,
        Duration::from_secs(cfg.privacy.session_idle_seconds),
        Duration::from_secs(cfg.privacy.sweep_interval_seconds.max(1)),
    );
    let monitor = match cfg.server.health_interval_seconds {
        0 => None,
        secs => Some(spawn_health_monitor(
            Arc::clone(runtime.orchestrator.registry()),
            Duration::from_secs(secs),
        )),
    };

    let state = AppState::new(runtime.orchestrator, runtime.pipeline);
    let router = server::build_router(state, &cfg.server.cors_origins);
    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());

    let result = server::serve(router, &bind).await;

    sweeper.abort();
    if let Some(monitor) = monitor {
        monitor.abort();
    }
    if let Some(handle) = watcher {
        handle.stop().await?;
    }
    result
}

/// Run one request and print the outcome
async fn process(
    cfg: &ResolvedConfig,
    model: Option<String>,
    session: Option<String>,
    input: Option<PathBuf>,
) -> Result<()> {
    let prompt = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    let runtime = Runtime::build(cfg).await?;
    let request = ProcessRequest {
        prompt,
        model,
        session_id: session,
    };

    let pipeline = runtime.pipeline.load_full();
    let run = runtime
        .orchestrator
        .process(request, &pipeline)
        .await
        .context("Processing failed")?;

    let output = json!({
        "result": run.result,
        "preprocessing": run.pre_trace,
        "postprocessing": run.post_trace,
        "sessionId": run.session_id,
        "unresolvedTokens": run.unresolved_tokens,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    eprintln!("\n[Run {} {:?}]", run.id, run.phase);

    Ok(())
}

/// List tools from every reachable server
async fn list_tools(cfg: &ResolvedConfig) -> Result<()> {
    let runtime = Runtime::build(cfg).await?;
    let tools = runtime.orchestrator.registry().list_tools();

    if tools.is_empty() {
        println!("No tools registered");
        return Ok(());
    }

    println!("{:<16} {:<22} {}", "SERVER", "TOOL", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    for tool in &tools {
        println!("{:<16} {:<22} {}", tool.server, tool.name, tool.description);
    }
    println!("\nTotal: {} tools", tools.len());

    Ok(())
}

/// Probe servers and print the aggregate
async fn show_health(cfg: &ResolvedConfig) -> Result<()> {
    let runtime = Runtime::build(cfg).await?;
    let report = runtime.orchestrator.registry().health_check().await;

    println!("Status: {}", report.status);
    println!("Detail: {}", report.detail);
    for server in &report.servers {
        match &server.detail {
            Some(detail) => println!("  {:<16} {:<12} {}", server.name, server.status, detail),
            None => println!("  {:<16} {}", server.name, server.status),
        }
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!(
        "# Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    print!("{}", cfg.to_redacted_yaml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn echo_config() -> ResolvedConfig {
        let mut cfg = ResolvedConfig::default();
        cfg.llm.provider = LlmProvider::Echo;
        cfg
    }

    #[test]
    fn test_cli_parses_process() {
        let cli =
            Cli::try_parse_from(["pipeguard", "process", "--model", "m", "-s", "chat-1"]).unwrap();
        match cli.command {
            Commands::Process { model, session, .. } => {
                assert_eq!(model.as_deref(), Some("m"));
                assert_eq!(session.as_deref(), Some("chat-1"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runtime_without_pipeline() {
        let runtime = Runtime::build(&echo_config()).await.unwrap();
        assert_eq!(runtime.pipeline.load().enabled_step_count(), 0);
        assert_eq!(runtime.orchestrator.registry().server_names().len(), 2);
    }

    #[tokio::test]
    async fn test_runtime_registers_remote_servers() {
        let mut cfg = echo_config();
        cfg.server.probe_timeout_seconds = 1;
        cfg.servers.push(crate::config::RemoteServerConfig {
            name: "search".to_string(),
            url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 1,
        });

        let runtime = Runtime::build(&cfg).await.unwrap();
        let registry = runtime.orchestrator.registry();
        assert_eq!(registry.server_names(), ["pii-handler", "text-utils", "search"]);
        // The unreachable server contributes no tools but does not fail startup
        assert!(registry.list_tools().iter().all(|t| t.server != "search"));
    }

    #[tokio::test]
    async fn test_runtime_loads_pipeline_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.yaml");
        std::fs::write(
            &path,
            "preprocessing:\n  pipeline:\n    - server: text-utils\n      tool: trim\n",
        )
        .unwrap();

        let mut cfg = echo_config();
        cfg.pipeline = Some(path);
        let runtime = Runtime::build(&cfg).await.unwrap();
        assert_eq!(runtime.pipeline.load().enabled_step_count(), 1);
    }

    #[tokio::test]
    async fn test_runtime_rejects_missing_pipeline() {
        let mut cfg = echo_config();
        cfg.pipeline = Some(PathBuf::from("/nonexistent/pipeline.yaml"));
        assert!(Runtime::build(&cfg).await.is_err());
    }
}
