//! HTTP surface.
//!
//! This module provides:
//! - The public API: trigger a run, poll a timeline, inspect or resume runs
//! - The store RPC addressed by timeline key (`/timelines/{id}/add|tree`)
//! - Shared application state and the axum router

mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::Orchestrator;
use crate::storage::SqliteStorage;
use crate::timeline::TimelineRegistry;

/// Application state shared across handlers.
pub struct AppState {
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Stage executor; also owns the timeline registry.
    pub orchestrator: Orchestrator,
    /// Process start, for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(storage: SqliteStorage, orchestrator: Orchestrator) -> Self {
        Self {
            storage,
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// Registry of per-key timeline actors
    pub fn timelines(&self) -> &TimelineRegistry {
        self.orchestrator.timelines()
    }
}

/// Shared state type alias
pub type SharedState = Arc<AppState>;

/// Create the router with every route
pub fn create_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/simulate", post(simulate))
        .route("/timeline", get(get_timeline))
        .route("/timeline/tree", get(get_timeline_tree))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/resume", post(resume_run));

    let store = Router::new()
        .route("/timelines/{timeline_id}/add", post(store_add))
        .route("/timelines/{timeline_id}/tree", get(store_tree));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .merge(store)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
