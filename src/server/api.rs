//! Axum handlers.
//!
//! Each handler receives [`AppState`] via [`axum::extract::State`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::core::ProcessRequest;
use crate::domain::{HealthReport, StageTrace, Tool};
use crate::error::{ProcessError, UpstreamError};

// ── Request / response types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProcessBody {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "session_id")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProcessResponse {
    result: String,
    preprocessing: StageTrace,
    postprocessing: StageTrace,
    session_id: String,
    unresolved_tokens: usize,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct HealthQuery {
    /// Return the last recorded report instead of checking again
    #[serde(default)]
    cached: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct LlmBody {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
}

/// Error body: `{detail}`
#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        let status = match err {
            UpstreamError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            UpstreamError::InvalidModel(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Rejected(_) => Self {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                detail: err.to_string(),
            },
            ProcessError::Upstream(upstream) => upstream.into(),
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
pub(super) async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "pipeguard backend is running." }))
}

/// POST /process
pub(super) async fn process(
    State(state): State<AppState>,
    Json(body): Json<ProcessBody>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let request = ProcessRequest {
        prompt: body.prompt,
        model: body.model,
        session_id: body.session_id,
    };

    // Pin the pipeline for the whole run; reloads apply to later requests
    let pipeline = state.pipeline.load_full();
    let run = state.orchestrator.process(request, &pipeline).await?;

    Ok(Json(ProcessResponse {
        result: run.result.unwrap_or_default(),
        preprocessing: run.pre_trace,
        postprocessing: run.post_trace,
        session_id: run.session_id,
        unresolved_tokens: run.unresolved_tokens,
    }))
}

/// GET /mcp/health[?cached=true]
pub(super) async fn mcp_health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Json<HealthReport> {
    let registry = state.orchestrator.registry();
    if query.cached {
        return Json(registry.last_health());
    }
    Json(registry.health_check().await)
}

/// GET /mcp/tools
pub(super) async fn mcp_tools(State(state): State<AppState>) -> Json<Vec<Tool>> {
    Json(state.orchestrator.registry().list_tools())
}

/// POST /llm/gemini
pub(super) async fn llm_gemini(
    State(state): State<AppState>,
    Json(body): Json<LlmBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = &state.orchestrator;
    let model = body
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| orchestrator.default_model().to_string());

    let response = orchestrator
        .llm()
        .generate(&body.prompt, &model)
        .await
        .map_err(|e| {
            warn!(error = %e, "Direct language model call failed");
            ApiError::from(e)
        })?;

    Ok(Json(json!({ "response": response })))
}

/// DELETE /sessions/:id
pub(super) async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.orchestrator.masker().store().evict(&id).await {
        info!(session_id = %id, "Session evicted");
    }
    StatusCode::NO_CONTENT
}
