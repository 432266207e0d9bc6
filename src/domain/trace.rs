//! Stage identifiers and the per-step execution trace.

use serde::{Deserialize, Serialize};

/// Which side of the language-model call a stage runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before the language-model call
    Pre,

    /// After the language-model call
    Post,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Pre, Stage::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one executed (non-skipped) step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStepResult {
    pub server: String,
    pub tool: String,
    pub description: String,

    /// Payload handed to the step
    pub input: String,

    /// Payload after the step; equals `input` when the step failed
    pub output: String,

    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub duration_ms: u64,
}

impl PipelineStepResult {
    pub fn success(
        server: &str,
        tool: &str,
        description: &str,
        input: String,
        output: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
            description: description.to_string(),
            input,
            output,
            succeeded: true,
            error: None,
            duration_ms,
        }
    }

    pub fn failure(
        server: &str,
        tool: &str,
        description: &str,
        input: String,
        error: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
            description: description.to_string(),
            output: input.clone(),
            input,
            succeeded: false,
            error: Some(error),
            duration_ms,
        }
    }
}

/// Trace of one stage as reported to callers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageTrace {
    /// Whether the stage was enabled in the pipeline document
    pub enabled: bool,

    /// Steps actually executed, in execution order
    pub pipeline: Vec<PipelineStepResult>,
}

impl StageTrace {
    pub fn new(enabled: bool, pipeline: Vec<PipelineStepResult>) -> Self {
        Self { enabled, pipeline }
    }

    pub fn failed_steps(&self) -> usize {
        self.pipeline.iter().filter(|s| !s.succeeded).count()
    }
}
