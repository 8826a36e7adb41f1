//! Tests for the conversation history read path.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use solace_chat::{create_message, CreateMessageParams};
use solace_companion::{KeywordScorer, TemplateResponder};
use solace_db::{DbPool, DbRuntimeSettings};
use solace_server::auth::{derive_credential_secret, HmacCredentialVerifier};
use solace_server::broadcast::RoomBroadcaster;
use solace_server::pipeline::MessagePipeline;
use solace_server::quota::QuotaLedger;
use solace_server::registry::ConnectionRegistry;
use solace_server::{app, AppState};
use solace_types::MessageRole;

fn setup_app() -> (axum::Router, DbPool) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap().to_string();
    std::mem::forget(db_file);

    let pool = solace_db::create_pool(&db_path, DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        solace_db::run_migrations(&conn).unwrap();
    }

    let registry = ConnectionRegistry::new();
    let broadcaster = RoomBroadcaster::new(registry.clone());
    let pipeline = Arc::new(MessagePipeline::new(
        pool.clone(),
        QuotaLedger::new(pool.clone()),
        broadcaster.clone(),
        Arc::new(KeywordScorer::new()),
        Arc::new(TemplateResponder::new()),
    ));
    let verifier = Arc::new(HmacCredentialVerifier::new(derive_credential_secret(
        "test-secret",
    )));

    let state = AppState {
        pool: pool.clone(),
        registry,
        broadcaster,
        pipeline,
        verifier,
    };

    (app(state), pool)
}

fn persist(pool: &DbPool, conversation: &str, message_id: &str, role: MessageRole, content: &str) {
    let conn = pool.get().unwrap();
    create_message(
        &conn,
        &CreateMessageParams {
            conversation_id: conversation.to_string(),
            message_id: message_id.to_string(),
            role,
            content: content.to_string(),
            sender_user_id: None,
            session_token: match role {
                MessageRole::Human => Some("anon-1".to_string()),
                MessageRole::Assistant => None,
            },
            score: None,
        },
    )
    .unwrap();
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn history_returns_messages_newest_first() {
    let (app, pool) = setup_app();
    persist(&pool, "conv-1", "msg-1", MessageRole::Human, "hello");
    persist(&pool, "conv-1", "msg-2", MessageRole::Assistant, "hi there");

    let (status, json) = get_json(app, "/api/conversations/conv-1/messages").await;
    assert_eq!(status, StatusCode::OK);

    let messages = json.as_array().expect("response should be a JSON array");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["messageId"], "msg-2");
    assert_eq!(messages[0]["role"], "assistant");
    assert_eq!(messages[1]["messageId"], "msg-1");
    assert_eq!(messages[1]["role"], "human");

    // The payload matches the WebSocket frame shape, and internal
    // attribution (session tokens) never leaves the persistence layer.
    assert!(messages[1].get("conversationId").is_some());
    assert!(messages[1].get("createdAt").is_some());
    assert!(messages[1].get("sessionToken").is_none());
    assert!(messages[1].get("session_token").is_none());
}

#[tokio::test]
async fn history_respects_limit() {
    let (app, pool) = setup_app();
    for i in 0..5 {
        persist(
            &pool,
            "conv-1",
            &format!("msg-{i}"),
            MessageRole::Human,
            &format!("m{i}"),
        );
    }

    let (status, json) = get_json(app, "/api/conversations/conv-1/messages?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn history_for_unknown_conversation_is_empty() {
    let (app, _pool) = setup_app();

    let (status, json) = get_json(app, "/api/conversations/ghost/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 0);
}
