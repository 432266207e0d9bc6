//! Stage executor.
//!
//! Runs the enabled steps of one [`StagePlan`] strictly in order, feeding each
//! step's output to the next. A failed step keeps the payload it received and
//! is recorded in the trace; whether the stage continues depends on the plan's
//! [`FailurePolicy`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use super::pipeline::{FailurePolicy, StagePlan, StepConfig};
use super::safety::{SafetyLimits, SafetyTracker};
use crate::domain::PipelineStepResult;
use crate::error::ToolInvocationError;
use crate::tools::{ToolCall, ToolRegistry};

/// Executes stage plans against the tool registry
#[derive(Clone)]
pub struct PipelineExecutor {
    registry: Arc<ToolRegistry>,
    limits: SafetyLimits,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<ToolRegistry>, limits: SafetyLimits) -> Self {
        Self { registry, limits }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Run one stage.
    ///
    /// Returns the final payload and one result per executed step, in order.
    /// Disabled steps are neither invoked nor traced. The plan is only read.
    #[instrument(skip(self, plan, payload), fields(stage = %plan.stage))]
    pub async fn run(
        &self,
        plan: &StagePlan,
        payload: String,
        session_id: &str,
    ) -> (String, Vec<PipelineStepResult>) {
        let mut payload = payload;
        let mut trace = Vec::new();
        let mut tracker = SafetyTracker::new();

        for step in plan.enabled_steps() {
            let result = match self.limits.check(&tracker) {
                Ok(()) => self.run_step(step, &payload, session_id, &mut tracker).await,
                Err(violation) => PipelineStepResult::failure(
                    &step.server,
                    &step.tool,
                    &step.description,
                    payload.clone(),
                    ToolInvocationError::from(violation).to_string(),
                    0,
                ),
            };

            let failed = !result.succeeded;
            if failed {
                warn!(
                    server = %step.server,
                    tool = %step.tool,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Tool step failed"
                );
            } else {
                payload = result.output.clone();
            }
            trace.push(result);

            if failed && plan.on_failure == FailurePolicy::Abort {
                warn!("Aborting remaining steps of stage");
                break;
            }
        }

        debug!(
            steps = trace.len(),
            failed = trace.iter().filter(|r| !r.succeeded).count(),
            elapsed_ms = tracker.elapsed_ms(),
            output_bytes = tracker.output_bytes,
            "Stage complete"
        );
        (payload, trace)
    }

    async fn run_step(
        &self,
        step: &StepConfig,
        input: &str,
        session_id: &str,
        tracker: &mut SafetyTracker,
    ) -> PipelineStepResult {
        let start = Instant::now();
        let call = ToolCall::new(input, session_id).with_params(step.parameters.clone());

        let outcome = self
            .registry
            .invoke(&step.server, &step.tool, call, step.timeout(&self.limits))
            .await
            .and_then(|output| {
                self.limits
                    .validate_step_output(&output)
                    .map(|_| output)
                    .map_err(ToolInvocationError::from)
            });
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                tracker.record_step(output.len() as u64);
                debug!(server = %step.server, tool = %step.tool, duration_ms, "Tool step succeeded");
                PipelineStepResult::success(
                    &step.server,
                    &step.tool,
                    &step.description,
                    input.to_string(),
                    output,
                    duration_ms,
                )
            }
            Err(err) => {
                tracker.record_step(0);
                PipelineStepResult::failure(
                    &step.server,
                    &step.tool,
                    &step.description,
                    input.to_string(),
                    err.to_string(),
                    duration_ms,
                )
            }
        }
    }
}
