//! Main orchestrator for request processing.
//!
//! Drives one request through
//! `Received → Masking → PreProcessing → LlmCall → PostProcessing → Unmasking → Done`.
//! The language-model call is the only step allowed to fail a run; tool and
//! session problems are absorbed into the traces.

use std::sync::Arc;

use tracing::{error, info, instrument, warn, Span};

use super::executor::PipelineExecutor;
use super::pipeline::PipelineConfig;
use super::safety::SafetyLimits;
use crate::domain::{PipelineRun, Stage, StageTrace};
use crate::error::ProcessError;
use crate::llm::{LanguageModel, DEFAULT_MODEL};
use crate::privacy::{PiiMasker, SessionStore};
use crate::tools::ToolRegistry;

/// Input to [`Orchestrator::process`]
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub prompt: String,

    /// Model identifier; the orchestrator default is used when absent
    pub model: Option<String>,

    /// Reuse an existing session for multi-turn masking continuity
    pub session_id: Option<String>,
}

impl ProcessRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// The session a run is using.
///
/// Pinned for the lifetime of the run so idle sweeps leave it alone. Sessions
/// the run allocated itself are evicted on release. If the run future is
/// dropped mid-flight, the release is handed to the runtime instead.
struct RunSession {
    store: Arc<dyn SessionStore>,
    id: Option<String>,
    owned: bool,
}

impl RunSession {
    async fn acquire(store: Arc<dyn SessionStore>, requested: Option<String>) -> Self {
        let (id, owned) = match requested {
            Some(id) => (id, false),
            None => (store.create().await, true),
        };
        store.pin(&id).await;
        Self {
            store,
            id: Some(id),
            owned,
        }
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            finish(self.store.as_ref(), &id, self.owned).await;
        }
    }
}

async fn finish(store: &dyn SessionStore, id: &str, owned: bool) {
    store.unpin(id).await;
    if owned {
        store.evict(id).await;
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let owned = self.owned;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                finish(store.as_ref(), &id, owned).await;
            });
        }
    }
}

/// Main request orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    executor: PipelineExecutor,
    masker: PiiMasker,
    llm: Arc<dyn LanguageModel>,
    limits: SafetyLimits,
    privacy_enabled: bool,
    default_model: String,
}

impl Orchestrator {
    /// Create a new orchestrator with default limits
    pub fn new(registry: Arc<ToolRegistry>, masker: PiiMasker, llm: Arc<dyn LanguageModel>) -> Self {
        let limits = SafetyLimits::default();
        Self {
            executor: PipelineExecutor::new(Arc::clone(&registry), limits.clone()),
            registry,
            masker,
            llm,
            limits,
            privacy_enabled: true,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_limits(mut self, limits: SafetyLimits) -> Self {
        self.executor = PipelineExecutor::new(Arc::clone(&self.registry), limits.clone());
        self.limits = limits;
        self
    }

    /// Toggle automatic masking around the stages
    pub fn with_privacy(mut self, enabled: bool) -> Self {
        self.privacy_enabled = enabled;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn masker(&self) -> &PiiMasker {
        &self.masker
    }

    pub fn llm(&self) -> &Arc<dyn LanguageModel> {
        &self.llm
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Process one request end to end.
    ///
    /// Sessions allocated here are evicted when the run ends. Sessions supplied
    /// by the caller are kept for later turns. Either way the session cannot
    /// be swept as idle while the run is in flight.
    #[instrument(
        skip(self, request, pipeline),
        fields(run_id = tracing::field::Empty, session_id = tracing::field::Empty)
    )]
    pub async fn process(
        &self,
        request: ProcessRequest,
        pipeline: &PipelineConfig,
    ) -> Result<PipelineRun, ProcessError> {
        self.limits.validate_prompt(&request.prompt)?;

        let session = RunSession::acquire(
            Arc::clone(self.masker.store()),
            request.session_id.filter(|s| !s.is_empty()),
        )
        .await;
        let session_id = session.id().to_string();

        let model = request
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        let mut run = PipelineRun::new(session_id.clone(), request.prompt, model.clone());

        let span = Span::current();
        span.record("run_id", tracing::field::display(run.id));
        span.record("session_id", session_id.as_str());
        info!(%model, "Run started");

        // Masking
        let masked = if self.privacy_enabled {
            let report = self.masker.mask(&session_id, &run.prompt).await;
            run.advance(format!("{} entities masked", report.entities.len()));
            report.text
        } else {
            run.advance("privacy disabled");
            run.prompt.clone()
        };

        // Pre-processing
        let pre = pipeline.stage(Stage::Pre);
        run.advance(format!("{} steps planned", pre.enabled_steps().count()));
        let (payload, steps) = self.executor.run(pre, masked, &session_id).await;
        run.pre_trace = StageTrace::new(pre.enabled, steps);

        // Language model
        run.advance(format!("calling {}", self.llm.name()));
        let generated = match self.llm.generate(&payload, &model).await {
            Ok(text) => text,
            Err(err) => {
                error!(error = %err, "Language model call failed");
                run.fail(err.to_string());
                session.release().await;
                return Err(ProcessError::Upstream(err));
            }
        };

        // Post-processing
        let post = pipeline.stage(Stage::Post);
        run.advance(format!("{} steps planned", post.enabled_steps().count()));
        let (payload, steps) = self.executor.run(post, generated, &session_id).await;
        run.post_trace = StageTrace::new(post.enabled, steps);

        // Unmasking
        let restored = self.masker.unmask(&session_id, &payload).await;
        run.unresolved_tokens = restored.unresolved.len();
        if run.unresolved_tokens > 0 {
            warn!(unresolved = run.unresolved_tokens, "Result contains unresolved tokens");
        }
        run.advance(format!(
            "{} tokens restored, {} unresolved",
            restored.restored, run.unresolved_tokens
        ));
        run.result = Some(restored.text);
        session.release().await;

        run.advance("done");
        info!(
            pre_failed = run.pre_trace.failed_steps(),
            post_failed = run.post_trace.failed_steps(),
            "Run complete"
        );
        Ok(run)
    }
}
