//! Conversation history API.
//!
//! Real-time delivery is best-effort; this read path is where clients
//! recover durable history after a reconnect or a dropped frame.

use crate::api_ws::WsMessagePayload;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

/// Query parameters for history pagination.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Return messages created before this timestamp (ISO 8601).
    pub before: Option<String>,
    /// Page size; capped server-side.
    pub limit: Option<u32>,
}

/// `GET /api/conversations/{conversationId}/messages`
///
/// Returns messages newest-first as the same payload shape the WebSocket
/// broadcasts, so clients merge the two streams without translation.
/// Sender session tokens never leave the persistence layer.
pub async fn get_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<WsMessagePayload>>, StatusCode> {
    let messages = tokio::task::spawn_blocking({
        let pool = state.pool.clone();
        let before = params.before;
        let limit = params.limit.map(|l| l.min(100));
        move || {
            let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            solace_chat::list_messages(&conn, &conversation_id, before, limit).map_err(|e| {
                tracing::error!(error = %e, "history query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })
        }
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(messages.into_iter().map(Into::into).collect()))
}
