//! HTTP surface.
//!
//! ```text
//! GET    /               liveness banner
//! POST   /process        run the pipeline around the language model
//! GET    /mcp/health     aggregated tool-server health
//! GET    /mcp/tools      tool catalogue
//! POST   /llm/gemini     direct language-model call (no masking, no stages)
//! DELETE /sessions/:id   release a masking session
//! ```
//!
//! Failures carry a `{detail}` body.

mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::{Orchestrator, SharedPipeline};

/// Router state injected into every handler.
///
/// Cheap to clone; all fields are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Current pipeline; swapped atomically on reload
    pub pipeline: SharedPipeline,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, pipeline: SharedPipeline) -> Self {
        Self {
            orchestrator,
            pipeline,
        }
    }
}

/// CORS policy: any origin when the list is empty, otherwise exactly the listed ones
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    cors.max_age(Duration::from_secs(3600))
}

/// Build the application router
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(api::root))
        .route("/process", post(api::process))
        .route("/mcp/health", get(api::mcp_health))
        .route("/mcp/tools", get(api::mcp_tools))
        .route("/llm/gemini", post(api::llm_gemini))
        .route("/sessions/:id", delete(api::delete_session))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Bind and serve until ctrl-c
pub async fn serve(router: Router, bind_addr: &str) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!(%bind_addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    info!("HTTP server shut down");
    Ok(())
}
