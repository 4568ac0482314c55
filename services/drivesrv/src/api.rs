//! REST API
//!
//! Request/response surface for external callers: registry snapshots,
//! connection status and command dispatch.

pub mod dto;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tower_http::trace::TraceLayer;

use crate::core::poller::PollStats;
use crate::core::{CommandDispatcher, ConnectionManager, DriveRegistryReader};

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: DriveRegistryReader,
    pub connection: Arc<ConnectionManager>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub poll_stats: Arc<Mutex<PollStats>>,
    pub drive_count: u16,
    pub started_at: DateTime<Utc>,
}

/// Build the API router
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/status", get(handlers::get_status))
        .route("/api/drives", get(handlers::list_drives))
        .route("/api/drives/{id}", get(handlers::get_drive))
        .route("/api/drives/{id}/command", post(handlers::send_command))
        .route(
            "/api/admin/log-level",
            get(common::admin_api::get_log_level).put(common::admin_api::set_log_level),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
