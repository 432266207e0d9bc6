//! Safety limits and enforcement for pipeline runs.
//!
//! Bounds the work a single request can cause:
//! - Prompt size accepted by the orchestrator
//! - Output size accepted from a single tool step
//! - Per-step timeout
//! - Number of steps executed per stage

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety limits for pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum prompt size in bytes (default: 1MB)
    #[serde(default = "default_max_prompt_bytes")]
    pub max_prompt_bytes: u64,

    /// Maximum payload a single tool step may return (default: 4MB)
    #[serde(default = "default_max_step_output_bytes")]
    pub max_step_output_bytes: u64,

    /// Per-step timeout in seconds (default: 30)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Maximum steps executed per stage (default: 32)
    #[serde(default = "default_max_steps_per_stage")]
    pub max_steps_per_stage: u32,
}

fn default_max_prompt_bytes() -> u64 {
    1024 * 1024
} // 1MB
fn default_max_step_output_bytes() -> u64 {
    4 * 1024 * 1024
} // 4MB
fn default_step_timeout() -> u64 {
    30
}
fn default_max_steps_per_stage() -> u32 {
    32
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_prompt_bytes: default_max_prompt_bytes(),
            max_step_output_bytes: default_max_step_output_bytes(),
            step_timeout_seconds: default_step_timeout(),
            max_steps_per_stage: default_max_steps_per_stage(),
        }
    }
}

impl SafetyLimits {
    /// Validate an inbound prompt against the size limit
    pub fn validate_prompt(&self, prompt: &str) -> Result<(), SafetyViolation> {
        let size = prompt.len() as u64;
        if size > self.max_prompt_bytes {
            return Err(SafetyViolation::MaxPromptBytes {
                actual: size,
                limit: self.max_prompt_bytes,
            });
        }
        Ok(())
    }

    /// Validate a tool step's output against size limits
    pub fn validate_step_output(&self, output: &str) -> Result<(), SafetyViolation> {
        let size = output.len() as u64;
        if size > self.max_step_output_bytes {
            return Err(SafetyViolation::MaxStepOutputBytes {
                actual: size,
                limit: self.max_step_output_bytes,
            });
        }
        Ok(())
    }

    /// Default step timeout
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    /// Check current tracker state against limits
    pub fn check(&self, tracker: &SafetyTracker) -> Result<(), SafetyViolation> {
        if tracker.steps_executed >= self.max_steps_per_stage {
            return Err(SafetyViolation::MaxSteps {
                actual: tracker.steps_executed,
                limit: self.max_steps_per_stage,
            });
        }
        Ok(())
    }
}

/// Tracks resource usage while one stage runs
#[derive(Debug, Clone)]
pub struct SafetyTracker {
    /// Number of steps invoked
    pub steps_executed: u32,

    /// Total output bytes produced by steps
    pub output_bytes: u64,

    /// When the stage started
    pub started_at: Instant,
}

impl Default for SafetyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyTracker {
    pub fn new() -> Self {
        Self {
            steps_executed: 0,
            output_bytes: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a step invocation
    pub fn record_step(&mut self, output_bytes: u64) {
        self.steps_executed += 1;
        self.output_bytes += output_bytes;
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Prompt too large: {actual} > {limit} bytes")]
    MaxPromptBytes { actual: u64, limit: u64 },

    #[error("Step output too large: {actual} > {limit} bytes")]
    MaxStepOutputBytes { actual: u64, limit: u64 },

    #[error("Maximum steps per stage exceeded: {actual} >= {limit}")]
    MaxSteps { actual: u32, limit: u32 },
}
