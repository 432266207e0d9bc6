//! Core request pipeline.
//!
//! This module contains:
//! - Pipeline: Stage plans loaded from the pipeline document
//! - Safety: Limits on prompt size, step output and step count
//! - Executor: Runs one stage against the tool registry
//! - Orchestrator: Masking, stages and the language-model call
//! - Watcher: Hot reload of the pipeline document

pub mod executor;
pub mod orchestrator;
pub mod pipeline;
pub mod safety;
pub mod watcher;

// Re-export commonly used types
pub use executor::PipelineExecutor;
pub use orchestrator::{Orchestrator, ProcessRequest};
pub use pipeline::{FailurePolicy, PipelineConfig, StagePlan, StepConfig};
pub use safety::{SafetyLimits, SafetyTracker, SafetyViolation};
pub use watcher::{PipelineWatcher, SharedPipeline, WatchHandle};
