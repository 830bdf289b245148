//! Towermap Service Library
//!
//! HTTP handlers, response types and routing for the cell tower search
//! service. Used by the `towermap-service` binary and integration tests.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use towermap::AreaSearchCache;

/// Application state shared across handlers.
pub struct AppState {
    /// Cached, quota-aware tower search.
    pub cache: AreaSearchCache,
}

/// Build the API router (without docs or middleware layers).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/towers/search", post(handlers::search_towers))
        .route("/api/towers/:id", get(handlers::get_tower))
        .route("/api/status", get(handlers::get_status))
        .route("/api/stats", get(handlers::get_stats))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use handlers::{
    ErrorResponse, HealthResponse, SearchRequest, SearchResponse, StatsResponse, StatusResponse,
    TowerResponse, ValidationErrorResponse,
};
