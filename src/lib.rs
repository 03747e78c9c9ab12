//! # Butterfly Timeline
//!
//! An alternate-history simulator. A user submits one divergence ("what if
//! Rome never fell?"); a durable stage pipeline asks a text generator what
//! the world looks like 1, 10, 50, 100 and 250 years later, and records
//! every step as a node in a per-key timeline store that clients poll and
//! render as a tree.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (axum) → Orchestrator ──generate──▶ Generator (HTTP)
//!                    │
//!                    ├──checkpoint──▶ SQLite (runs, checkpoints)
//!                    └──add──▶ Timeline actor ──▶ SQLite (nodes)
//! ```
//!
//! Every stage is checkpointed, so a run interrupted by a crash or a
//! permanent failure resumes from its last completed stage without calling
//! the generator again for work already done.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use butterfly_timeline::{Config, AppState, create_router};
//! use butterfly_timeline::generation::GenerationClient;
//! use butterfly_timeline::pipeline::Orchestrator;
//! use butterfly_timeline::storage::SqliteStorage;
//! use butterfly_timeline::timeline::TimelineRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let generator = Arc::new(GenerationClient::new(&config.generation, &config.request)?);
//!     let timelines = TimelineRegistry::new(storage.clone());
//!     let orchestrator = Orchestrator::from_config(storage.clone(), timelines, generator, &config)?;
//!     let app = create_router(Arc::new(AppState::new(storage, orchestrator)));
//!     let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Text generation client and the `Generator` seam.
pub mod generation;
/// Stage definitions, retry policy and the checkpointing executor.
pub mod pipeline;
/// Prompt templates for generated stages.
pub mod prompts;
/// HTTP routes and shared state.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;
/// Per-key timeline store with serialized writes.
pub mod timeline;
/// Tree reconstruction from flat node lists.
pub mod tree;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{create_router, AppState, SharedState};
