//! pipeguard - PII-safe tool pipelines around a language model
//!
//! Every request is masked, passed through a configurable pre-processing
//! stage, sent to the language model, passed through a post-processing
//! stage and finally unmasked.
//!
//! # Architecture
//!
//! - Personal data never reaches the model: it is replaced with
//!   session-scoped tokens that are restored on the way back
//! - Stages are ordered lists of tool invocations; a failing tool is
//!   recorded in the trace and the payload passes through unchanged
//! - Only the language-model call can fail a request
//!
//! # Modules
//!
//! - `privacy`: PII detection, masking and session storage
//! - `tools`: Tool servers and the registry
//! - `llm`: Language-model clients (Gemini, echo)
//! - `core`: Pipeline documents, executor, orchestrator, hot reload
//! - `domain`: Data structures (Tool, StageTrace, PipelineRun)
//! - `server`: HTTP API
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP API, reloading the pipeline on change
//! pipeguard serve --watch
//!
//! # Process one prompt
//! echo "My email is a@b.com" | pipeguard process
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod llm;
pub mod privacy;
pub mod server;
pub mod tools;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, PipelineConfig, ProcessRequest};
pub use domain::{PipelineRun, PipelineStepResult, Stage, StageTrace, Tool};
pub use error::{ProcessError, ToolInvocationError, UpstreamError};
pub use privacy::{InMemorySessionStore, PiiMasker, SessionStore};
pub use tools::ToolRegistry;
