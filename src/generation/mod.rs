//! Generation capability: ordered role-tagged messages in, text out.
//!
//! The [`Generator`] trait is the seam the pipeline executor depends on.
//! [`GenerationClient`] implements it over a Workers-AI style HTTP endpoint.

mod client;
mod types;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use client::GenerationClient;
pub use types::*;

use async_trait::async_trait;

use crate::error::GenerationResult;

/// A text generation backend.
///
/// One call is one attempt; retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for the given conversation.
    async fn generate(&self, messages: &[Message]) -> GenerationResult<String>;
}
