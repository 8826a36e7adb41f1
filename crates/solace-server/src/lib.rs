//! Solace server library logic.
//!
//! Wires the live session core together: the connection registry, room
//! broadcaster, quota ledger, and message pipeline, exposed over a
//! WebSocket event surface plus a small HTTP read API.

pub mod api_conversations;
pub mod api_ws;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod pipeline;
pub mod quota;
pub mod registry;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Extension, Json, Router,
};
use serde_json::{json, Value};
use solace_db::DbPool;
use tower_http::cors::{Any, CorsLayer};

use auth::CredentialVerifier;
use broadcast::RoomBroadcaster;
use pipeline::MessagePipeline;
use registry::ConnectionRegistry;

/// Maximum request body size (256 KiB). The server owns no upload paths;
/// anything larger than a chat payload is abuse.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across all request handlers.
///
/// Everything in here is instance-owned and injected — no process-wide
/// singletons — so tests run several isolated servers side by side.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live connection and room-membership state.
    pub registry: ConnectionRegistry,
    /// Room fan-out.
    pub broadcaster: RoomBroadcaster,
    /// The per-message pipeline.
    pub pipeline: Arc<MessagePipeline>,
    /// Join-time credential verification.
    pub verifier: Arc<dyn CredentialVerifier>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/conversations/{conversationId}/messages",
            get(api_conversations::get_history_handler),
        )
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
