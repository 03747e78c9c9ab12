//! Durable stage pipeline.
//!
//! This module provides:
//! - [`PipelineDefinition`]: the ordered stage offsets and their prompts
//! - [`PipelineState`]: the per-run state machine
//! - [`RetryPolicy`]: bounded exponential backoff for transient failures
//! - [`Orchestrator`]: the checkpointing executor that drives one run per
//!   submitted divergence and persists every stage into its timeline

mod definition;
mod executor;
mod retry;
mod state;

pub use definition::*;
pub use executor::*;
pub use retry::*;
pub use state::*;
