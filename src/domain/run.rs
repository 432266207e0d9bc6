//! Run state for one orchestrator invocation.
//!
//! A `PipelineRun` is transient: it lives for one `process` call and is
//! returned to the caller, never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{RunEvent, RunPhase};
use super::trace::StageTrace;

/// A single request passing through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Session used for masking and unmasking
    pub session_id: String,

    /// Prompt as received
    pub prompt: String,

    /// Model identifier sent to the language model
    pub model: String,

    /// Current phase
    pub phase: RunPhase,

    /// Pre-processing trace
    pub pre_trace: StageTrace,

    /// Final, unmasked result (set once the run is `Done`)
    pub result: Option<String>,

    /// Post-processing trace
    pub post_trace: StageTrace,

    /// Tokens left in the result because the session could not resolve them
    pub unresolved_tokens: usize,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Ordered phase transitions
    pub events: Vec<RunEvent>,
}

impl PipelineRun {
    /// Create a run in the `Received` phase
    pub fn new(session_id: String, prompt: String, model: String) -> Self {
        let mut run = Self {
            id: Uuid::new_v4(),
            session_id,
            prompt,
            model,
            phase: RunPhase::Received,
            pre_trace: StageTrace::default(),
            result: None,
            post_trace: StageTrace::default(),
            unresolved_tokens: 0,
            started_at: Utc::now(),
            completed_at: None,
            events: Vec::new(),
        };
        run.events
            .push(RunEvent::new(RunPhase::Received, "Request received"));
        run
    }

    /// Move to the next phase on the success path.
    ///
    /// Returns the phase entered, or `None` when the run is already terminal.
    pub fn advance(&mut self, summary: impl Into<String>) -> Option<RunPhase> {
        let next = self.phase.next()?;
        self.phase = next;
        self.events.push(RunEvent::new(next, summary));
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        tracing::debug!(run_id = %self.id, phase = ?next, "Run phase");
        Some(next)
    }

    /// Mark the run failed. Only legal while the language model is being called.
    pub fn fail(&mut self, error: String) -> bool {
        if self.phase != RunPhase::LlmCall {
            return false;
        }
        self.phase = RunPhase::Failed;
        self.completed_at = Some(Utc::now());
        self.events.push(
            RunEvent::new(RunPhase::Failed, "Language model call failed").with_error(error),
        );
        true
    }

    /// Phases visited so far, in order
    pub fn phases(&self) -> Vec<RunPhase> {
        self.events.iter().map(|e| e.phase).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_run() -> PipelineRun {
        PipelineRun::new(
            "session".to_string(),
            "hello".to_string(),
            "gemini-2.0-flash".to_string(),
        )
    }

    #[test]
    fn test_run_creation() {
        let run = new_run();
        assert_eq!(run.phase, RunPhase::Received);
        assert_eq!(run.phases(), vec![RunPhase::Received]);
        assert!(!run.phase.is_terminal());
    }

    #[test]
    fn test_advance_to_done() {
        let mut run = new_run();
        while run.advance("step").is_some() {}
        assert_eq!(run.phase, RunPhase::Done);
        assert_eq!(run.events.len(), 7);
        assert!(run.completed_at.is_some());
        assert!(run.advance("again").is_none());
    }

    #[test]
    fn test_fail_only_from_llm_call() {
        let mut run = new_run();
        assert!(!run.fail("too early".to_string()));

        run.advance("masking");
        run.advance("pre");
        assert!(!run.fail("still too early".to_string()));

        run.advance("llm");
        assert!(run.fail("upstream down".to_string()));
        assert_eq!(run.phase, RunPhase::Failed);
        assert_eq!(
            run.events.last().and_then(|e| e.error.clone()),
            Some("upstream down".to_string())
        );
        assert!(run.advance("after failure").is_none());
    }
}
