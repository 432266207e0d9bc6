//! Safety Limits Integration Tests
//!
//! Limits loaded from configuration and enforced by the executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pipeguard::core::{
    Orchestrator, PipelineConfig, PipelineExecutor, ProcessRequest, SafetyLimits, SafetyTracker,
    SafetyViolation, StagePlan, StepConfig,
};
use pipeguard::domain::{Stage, Tool};
use pipeguard::error::{ProcessError, RegistryUnavailableError, ToolInvocationError};
use pipeguard::llm::EchoModel;
use pipeguard::privacy::{InMemorySessionStore, PiiMasker, SessionStore};
use pipeguard::tools::{BuiltinServer, ToolCall, ToolHandler, ToolRegistry, ToolServer};

/// Tool that sleeps before answering
struct SlowTool {
    descriptor: Tool,
    delay: Duration,
}

#[async_trait]
impl ToolHandler for SlowTool {
    fn descriptor(&self) -> &Tool {
        &self.descriptor
    }

    async fn invoke(&self, call: ToolCall) -> Result<String, ToolInvocationError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("{} (slow)", call.payload))
    }
}

struct SlowServer;

#[async_trait]
impl ToolServer for SlowServer {
    fn name(&self) -> &str {
        "slow"
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn ToolHandler>>, RegistryUnavailableError> {
        Ok(vec![Arc::new(SlowTool {
            descriptor: Tool::new("slow", "wait", "sleeps for two seconds"),
            delay: Duration::from_secs(2),
        })])
    }

    async fn probe(&self) -> Result<(), RegistryUnavailableError> {
        Ok(())
    }
}

async fn registry() -> Arc<ToolRegistry> {
    let servers: Vec<Arc<dyn ToolServer>> =
        vec![Arc::new(BuiltinServer::text_utils()), Arc::new(SlowServer)];
    Arc::new(ToolRegistry::connect(servers).await)
}

#[test]
fn test_limits_from_yaml_use_defaults() {
    let limits: SafetyLimits = serde_yaml::from_str("max_steps_per_stage: 3\n").unwrap();
    assert_eq!(limits.max_steps_per_stage, 3);
    assert_eq!(limits.step_timeout_seconds, 30);
    assert_eq!(limits.max_prompt_bytes, 1024 * 1024);
}

#[test]
fn test_step_limit_violation_message() {
    let limits = SafetyLimits {
        max_steps_per_stage: 1,
        ..Default::default()
    };
    let mut tracker = SafetyTracker::new();
    tracker.record_step(10);

    let err = limits.check(&tracker).unwrap_err();
    assert_eq!(err, SafetyViolation::MaxSteps { actual: 1, limit: 1 });
    assert!(err.to_string().contains("Maximum steps per stage exceeded"));
}

#[tokio::test]
async fn test_step_timeout_override_fails_step() {
    let executor = PipelineExecutor::new(registry().await, SafetyLimits::default());
    let mut step = StepConfig::new("slow", "wait");
    step.timeout_seconds = Some(1);
    let plan = StagePlan::new(Stage::Pre, vec![step, StepConfig::new("text-utils", "trim")]);

    let (payload, trace) = executor.run(&plan, " hi ".to_string(), "s").await;

    assert!(!trace[0].succeeded);
    assert!(trace[0].error.as_deref().unwrap().contains("timed out"));
    assert!(trace[1].succeeded);
    assert_eq!(payload, "hi");
}

#[tokio::test]
async fn test_steps_beyond_limit_are_failed_not_invoked() {
    let limits = SafetyLimits {
        max_steps_per_stage: 2,
        ..Default::default()
    };
    let executor = PipelineExecutor::new(registry().await, limits);
    let plan = StagePlan::new(
        Stage::Post,
        vec![
            StepConfig::new("text-utils", "trim"),
            StepConfig::new("text-utils", "collapse_whitespace"),
            StepConfig::new("text-utils", "annotate"),
        ],
    );

    let (payload, trace) = executor.run(&plan, "  a  b  ".to_string(), "s").await;

    assert_eq!(trace.len(), 3);
    assert!(trace[0].succeeded && trace[1].succeeded);
    assert!(!trace[2].succeeded);
    assert_eq!(payload, "a b");
}

#[tokio::test]
async fn test_oversized_step_output_is_rejected() {
    let limits = SafetyLimits {
        max_step_output_bytes: 8,
        ..Default::default()
    };
    let executor = PipelineExecutor::new(registry().await, limits);
    let plan = StagePlan::new(Stage::Pre, vec![StepConfig::new("text-utils", "annotate")]);

    let (payload, trace) = executor.run(&plan, "short".to_string(), "s").await;

    assert!(!trace[0].succeeded);
    assert!(trace[0].error.as_deref().unwrap().contains("Step output too large"));
    assert_eq!(payload, "short");
}

#[tokio::test]
async fn test_oversized_prompt_rejected_before_any_work() {
    let store = Arc::new(InMemorySessionStore::new());
    let masker = PiiMasker::new(store.clone());
    let orchestrator = Orchestrator::new(registry().await, masker, Arc::new(EchoModel)).with_limits(
        SafetyLimits {
            max_prompt_bytes: 16,
            ..Default::default()
        },
    );

    let err = orchestrator
        .process(
            ProcessRequest::new("this prompt is far too long"),
            &PipelineConfig::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::Rejected(SafetyViolation::MaxPromptBytes { .. })));
    assert_eq!(store.len().await, 0);
}
