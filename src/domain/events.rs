//! Phase-transition events for a pipeline run.
//!
//! Each run keeps an in-memory, append-only list of these. They are never
//! persisted and never carry payload text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a run.
///
/// `Received → Masking → PreProcessing → LlmCall → PostProcessing → Unmasking → Done`,
/// with `Failed` reachable from `LlmCall` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Received,
    Masking,
    PreProcessing,
    LlmCall,
    PostProcessing,
    Unmasking,
    Done,
    Failed,
}

impl RunPhase {
    /// The phase that follows on success, `None` for terminal phases
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Masking),
            Self::Masking => Some(Self::PreProcessing),
            Self::PreProcessing => Some(Self::LlmCall),
            Self::LlmCall => Some(Self::PostProcessing),
            Self::PostProcessing => Some(Self::Unmasking),
            Self::Unmasking => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A single recorded transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// When the run entered `phase`
    pub timestamp: DateTime<Utc>,

    /// Phase entered
    pub phase: RunPhase,

    /// Human-readable summary (counts only, NO payload text)
    pub summary: String,

    /// Error message when entering `Failed`
    pub error: Option<String>,
}

impl RunEvent {
    pub fn new(phase: RunPhase, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            summary: summary.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut phase = RunPhase::Received;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                RunPhase::Received,
                RunPhase::Masking,
                RunPhase::PreProcessing,
                RunPhase::LlmCall,
                RunPhase::PostProcessing,
                RunPhase::Unmasking,
                RunPhase::Done,
            ]
        );
        assert!(RunPhase::Failed.next().is_none());
    }

    #[test]
    fn test_event_with_error() {
        let event = RunEvent::new(RunPhase::Failed, "LLM call failed")
            .with_error("Connection timeout".to_string());
        assert_eq!(event.error, Some("Connection timeout".to_string()));
        assert!(event.phase.is_terminal());
    }
}
