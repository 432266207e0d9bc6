//! Pipeline definitions and loading.
//!
//! A pipeline document lists, per stage, the ordered tool steps to run around
//! the language-model call:
//!
//! ```yaml
//! preprocessing:
//!   enabled: true
//!   on_failure: continue
//!   pipeline:
//!     - server: pii-handler
//!       tool: sanitize_input
//!       description: Mask PII
//! postprocessing:
//!   pipeline:
//!     - server: pii-handler
//!       tool: restore_pii
//! ```
//!
//! JSON documents with the same shape are accepted as well.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::safety::SafetyLimits;
use crate::domain::Stage;

/// One configured tool step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Owning tool server
    pub server: String,

    /// Tool name on that server
    pub tool: String,

    /// Human-readable description, copied into the trace
    #[serde(default)]
    pub description: String,

    /// Parameters handed to the tool
    #[serde(default, alias = "params")]
    pub parameters: serde_json::Value,

    /// Disabled steps are skipped and never traced
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Override timeout for this step (uses limits.step_timeout_seconds if not set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl StepConfig {
    pub fn new(server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
            description: String::new(),
            parameters: serde_json::Value::Null,
            enabled: true,
            timeout_seconds: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Get the effective timeout for this step
    pub fn timeout(&self, limits: &SafetyLimits) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(limits.step_timeout_seconds);
        Duration::from_secs(seconds)
    }
}

fn default_true() -> bool {
    true
}

/// What the executor does after a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure, keep the payload, run the next step
    #[default]
    Continue,

    /// Record the failure and skip the rest of the stage
    Abort,
}

/// Ordered steps for one stage
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub stage: Stage,
    /// A disabled stage runs no steps
    pub enabled: bool,
    pub on_failure: FailurePolicy,
    pub steps: Vec<StepConfig>,
}

impl StagePlan {
    /// Enabled stage with no steps
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            enabled: true,
            on_failure: FailurePolicy::Continue,
            steps: Vec::new(),
        }
    }

    pub fn new(stage: Stage, steps: Vec<StepConfig>) -> Self {
        Self {
            steps,
            ..Self::empty(stage)
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Steps that will actually be invoked, in order
    pub fn enabled_steps(&self) -> impl Iterator<Item = &StepConfig> {
        self.steps
            .iter()
            .filter(move |s| self.enabled && s.enabled)
    }

    fn from_document(stage: Stage, doc: StageDocument) -> Self {
        Self {
            stage,
            enabled: doc.enabled,
            on_failure: doc.on_failure,
            steps: doc.pipeline,
        }
    }

    fn to_document(&self) -> StageDocument {
        StageDocument {
            enabled: self.enabled,
            on_failure: self.on_failure,
            pipeline: self.steps.clone(),
        }
    }
}

/// On-disk shape of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StageDocument {
    #[serde(default = "default_true")]
    enabled: bool,

    #[serde(default)]
    on_failure: FailurePolicy,

    #[serde(default)]
    pipeline: Vec<StepConfig>,
}

/// On-disk shape of a pipeline document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PipelineDocument {
    #[serde(default, alias = "pre", skip_serializing_if = "Option::is_none")]
    preprocessing: Option<StageDocument>,

    #[serde(default, alias = "post", skip_serializing_if = "Option::is_none")]
    postprocessing: Option<StageDocument>,
}

/// Pre and post stage plans for the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PipelineDocument", into = "PipelineDocument")]
pub struct PipelineConfig {
    pre: StagePlan,
    post: StagePlan,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pre: StagePlan::empty(Stage::Pre),
            post: StagePlan::empty(Stage::Post),
        }
    }
}

impl TryFrom<PipelineDocument> for PipelineConfig {
    type Error = String;

    fn try_from(doc: PipelineDocument) -> std::result::Result<Self, Self::Error> {
        let plan = |stage, doc: Option<StageDocument>| match doc {
            Some(doc) => StagePlan::from_document(stage, doc),
            None => StagePlan::empty(stage),
        };
        let config = Self {
            pre: plan(Stage::Pre, doc.preprocessing),
            post: plan(Stage::Post, doc.postprocessing),
        };
        config.check().map(|_| config)
    }
}

impl From<PipelineConfig> for PipelineDocument {
    fn from(config: PipelineConfig) -> Self {
        Self {
            preprocessing: Some(config.pre.to_document()),
            postprocessing: Some(config.post.to_document()),
        }
    }
}

impl PipelineConfig {
    /// Build from explicit stage plans. The plans' own `stage` tags are overwritten.
    pub fn new(mut pre: StagePlan, mut post: StagePlan) -> Self {
        pre.stage = Stage::Pre;
        post.stage = Stage::Post;
        Self { pre, post }
    }

    /// Load a pipeline document from disk (`.json` as JSON, anything else as YAML)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };
        parsed.with_context(|| format!("Invalid pipeline file: {}", path.display()))
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Parse a pipeline from JSON content
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse pipeline JSON")
    }

    /// Plan for one stage
    pub fn stage(&self, stage: Stage) -> &StagePlan {
        match stage {
            Stage::Pre => &self.pre,
            Stage::Post => &self.post,
        }
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<()> {
        self.check().map_err(anyhow::Error::msg)
    }

    fn check(&self) -> std::result::Result<(), String> {
        for plan in [&self.pre, &self.post] {
            for (i, step) in plan.steps.iter().enumerate() {
                if step.server.trim().is_empty() {
                    return Err(format!("{} step {} has an empty server name", plan.stage, i));
                }
                if step.tool.trim().is_empty() {
                    return Err(format!("{} step {} has an empty tool name", plan.stage, i));
                }
                if step.timeout_seconds == Some(0) {
                    return Err(format!(
                        "{} step {} ({}.{}) has a zero timeout",
                        plan.stage, i, step.server, step.tool
                    ));
                }
            }
        }
        Ok(())
    }

    /// Number of steps that will run across both stages
    pub fn enabled_step_count(&self) -> usize {
        self.pre.enabled_steps().count() + self.post.enabled_steps().count()
    }
}
