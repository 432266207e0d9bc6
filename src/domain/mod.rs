//! Domain types for the pipeline gateway.
//!
//! This module contains the core data structures:
//! - Tool: Catalogue entries and server health
//! - Trace: Stage identifiers and per-step results
//! - Events: Phase transitions of a run
//! - Run: Transient state of one request

pub mod events;
pub mod run;
pub mod tool;
pub mod trace;

// Re-export commonly used types
pub use events::{RunEvent, RunPhase};
pub use run::PipelineRun;
pub use tool::{HealthReport, HealthStatus, ServerHealth, Tool};
pub use trace::{PipelineStepResult, Stage, StageTrace};
