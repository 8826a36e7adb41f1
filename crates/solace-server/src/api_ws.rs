//! WebSocket API handler and connection lifecycle.
//!
//! One socket per client. Connections are established without credentials
//! — anonymous visitors are first-class — and receive an opaque session
//! token on upgrade, reusable across reconnects. Credentials, when a
//! client has them, are presented on join events only.

use crate::pipeline::{Author, PipelineError};
use crate::registry::room_key;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use solace_types::{AckStatus, LabelIntensity, MessageRole, MAX_MESSAGE_CONTENT_LEN};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Query parameters for the WebSocket connection.
///
/// `session` carries a previously issued anonymous session token; when it
/// is absent a fresh one is minted and returned in the `session` frame.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub session: Option<String>,
}

/// Incoming WebSocket frame types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingFrame {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        credential: Option<String>,
    },
    #[serde(rename = "leave")]
    Leave {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    #[serde(rename = "message")]
    Message {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
    },
}

/// Outgoing message payload with camelCase field names.
///
/// The persisted `solace_chat::Message` uses snake_case for storage and
/// the HTTP API; WebSocket frames use camelCase to match the client frame
/// types.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessagePayload {
    pub conversation_id: String,
    pub message_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<LabelIntensity>>,
    pub created_at: String,
}

impl From<solace_chat::Message> for WsMessagePayload {
    fn from(m: solace_chat::Message) -> Self {
        let (valence, labels) = match m.score {
            Some(score) => (Some(score.valence), Some(score.labels)),
            None => (None, None),
        };
        Self {
            conversation_id: m.conversation_id,
            message_id: m.message_id,
            role: m.role,
            content: m.content,
            valence,
            labels,
            created_at: m.created_at,
        }
    }
}

/// Outgoing WebSocket frame wrapper.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingFrame {
    /// Issued once per connection, immediately after upgrade.
    #[serde(rename = "session")]
    Session {
        #[serde(rename = "sessionToken")]
        session_token: String,
    },
    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    /// A message-created event (human or assistant), fanned out to every
    /// room member.
    #[serde(rename = "message")]
    Message(WsMessagePayload),
    /// Synchronous acknowledgement to the sender of a message.
    #[serde(rename = "ack")]
    Ack {
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining: Option<i64>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Sends a JSON-serialized frame over the connection's outbound channel.
fn send_frame(tx: &mpsc::Sender<String>, frame: &OutgoingFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to queue WebSocket frame for client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize WebSocket frame: {}", e);
        }
    }
}

fn send_error(tx: &mpsc::Sender<String>, message: String) {
    send_frame(tx, &OutgoingFrame::Error { message });
}

fn send_ack(tx: &mpsc::Sender<String>, status: AckStatus, remaining: Option<i64>) {
    send_frame(tx, &OutgoingFrame::Ack { status, remaining });
}

/// WebSocket handler: `GET /ws?session=...`.
///
/// The upgrade itself is unauthenticated; identity is bound later via
/// join-time credentials. Liveness is the transport's concern (axum's
/// built-in ping/pong) — when the socket closes for any reason the
/// connection is unregistered exactly once below.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    tracing::debug!(remote_addr = %addr, resumed_session = params.session.is_some(), "websocket connect");
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.session))
}

/// Handles one WebSocket connection from upgrade to teardown.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session: Option<String>) {
    let connection_id = Uuid::new_v4();
    let session_token = session.unwrap_or_else(|| Uuid::new_v4().to_string());

    let (mut sender, mut receiver) = socket.split();

    // Bounded outbound channel per connection: slow consumers drop frames
    // instead of growing memory without bound.
    let (tx, mut rx) = mpsc::channel::<String>(256);

    state.registry.register(connection_id, tx.clone());

    // Hand the session token back so the client can reuse it on reconnect.
    send_frame(
        &tx,
        &OutgoingFrame::Session {
            session_token: session_token.clone(),
        },
    );

    // Forward queued frames to the socket until either side closes.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if let AxumMessage::Text(text) = msg {
            if let Ok(incoming) = serde_json::from_str::<IncomingFrame>(&text.to_string()) {
                match incoming {
                    IncomingFrame::Join {
                        conversation_id,
                        credential,
                    } => {
                        if let Some(credential) = credential {
                            match state.verifier.verify(&credential) {
                                Ok(user_id) => {
                                    state.registry.authenticate(connection_id, &user_id);
                                }
                                Err(e) => {
                                    // Rejects only this join; the
                                    // connection stays live for a retry.
                                    tracing::debug!(
                                        %connection_id,
                                        %conversation_id,
                                        "join credential rejected: {}",
                                        e
                                    );
                                    send_error(&tx, "invalid credential".to_string());
                                    continue;
                                }
                            }
                        }
                        state.registry.join(connection_id, &room_key(&conversation_id));
                        send_frame(&tx, &OutgoingFrame::Joined { conversation_id });
                    }
                    IncomingFrame::Leave { conversation_id } => {
                        state.registry.leave(connection_id, &room_key(&conversation_id));
                    }
                    IncomingFrame::Message {
                        conversation_id,
                        content,
                    } => {
                        if content.len() > MAX_MESSAGE_CONTENT_LEN {
                            send_error(
                                &tx,
                                format!(
                                    "message content exceeds maximum length of {} bytes",
                                    MAX_MESSAGE_CONTENT_LEN
                                ),
                            );
                            send_ack(&tx, AckStatus::Error, None);
                            continue;
                        }

                        if !state
                            .registry
                            .is_joined(connection_id, &room_key(&conversation_id))
                        {
                            send_error(
                                &tx,
                                format!("not joined to conversation {}", conversation_id),
                            );
                            send_ack(&tx, AckStatus::Error, None);
                            continue;
                        }

                        let author = match state.registry.identity(connection_id) {
                            Some(user_id) => Author::User { user_id },
                            None => Author::Anonymous {
                                session_token: session_token.clone(),
                            },
                        };

                        match state
                            .pipeline
                            .handle_inbound(&conversation_id, &author, &content)
                            .await
                        {
                            Ok(delivery) => {
                                send_ack(&tx, AckStatus::Delivered, delivery.remaining);
                            }
                            Err(PipelineError::QuotaExceeded) => {
                                send_ack(&tx, AckStatus::QuotaExceeded, None);
                            }
                            Err(PipelineError::Persistence(e)) => {
                                tracing::error!(
                                    %connection_id,
                                    %conversation_id,
                                    "message delivery failed: {}",
                                    e
                                );
                                send_ack(&tx, AckStatus::Error, None);
                            }
                        }
                    }
                }
            } else {
                tracing::warn!(%connection_id, "failed to parse incoming WebSocket frame");
                send_error(&tx, "invalid frame format".to_string());
            }
        } else if let AxumMessage::Close(_) = msg {
            break;
        }
    }

    // Teardown: exactly one unregister per socket close (the call itself
    // is idempotent, so a transport-level double signal is harmless).
    state.registry.unregister(connection_id);
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use solace_types::EmotionScore;

    fn sample_message(score: Option<EmotionScore>) -> solace_chat::Message {
        solace_chat::Message {
            id: 1,
            conversation_id: "conv-1".to_string(),
            message_id: "msg-1".to_string(),
            role: MessageRole::Human,
            content: "hello".to_string(),
            sender_user_id: None,
            session_token: Some("anon-1".to_string()),
            score,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn ws_message_payload_serializes_camel_case() {
        let payload: WsMessagePayload = sample_message(None).into();
        let json = serde_json::to_value(&payload).expect("serialization should not fail");

        assert!(json.get("conversationId").is_some(), "expected camelCase conversationId");
        assert!(json.get("messageId").is_some(), "expected camelCase messageId");
        assert!(json.get("createdAt").is_some(), "expected camelCase createdAt");
        assert_eq!(json.get("role").and_then(|v| v.as_str()), Some("human"));

        // Verify snake_case keys are NOT present
        assert!(json.get("conversation_id").is_none());
        assert!(json.get("message_id").is_none());

        // Absent score serializes no valence/labels keys at all
        assert!(json.get("valence").is_none());
        assert!(json.get("labels").is_none());
    }

    #[test]
    fn ws_message_payload_carries_score_fields() {
        let score = EmotionScore {
            valence: -0.7,
            labels: vec![LabelIntensity {
                label: "sadness".to_string(),
                intensity: 0.9,
            }],
        };
        let payload: WsMessagePayload = sample_message(Some(score)).into();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json.get("valence").and_then(|v| v.as_f64()), Some(-0.7));
        assert_eq!(
            json["labels"][0]["label"].as_str(),
            Some("sadness"),
            "labels should serialize inline"
        );
    }

    #[test]
    fn outgoing_frames_carry_type_tags() {
        let ack = OutgoingFrame::Ack {
            status: AckStatus::QuotaExceeded,
            remaining: None,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("ack"));
        assert_eq!(
            json.get("status").and_then(|v| v.as_str()),
            Some("quota_exceeded")
        );
        assert!(json.get("remaining").is_none());

        let session = OutgoingFrame::Session {
            session_token: "tok".to_string(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("session"));
        assert_eq!(json.get("sessionToken").and_then(|v| v.as_str()), Some("tok"));
    }

    #[test]
    fn incoming_frames_parse_from_client_json() {
        let join: IncomingFrame = serde_json::from_str(
            r#"{"type":"join","conversationId":"conv-7","credential":null}"#,
        )
        .expect("join frame should parse");
        match join {
            IncomingFrame::Join {
                conversation_id,
                credential,
            } => {
                assert_eq!(conversation_id, "conv-7");
                assert!(credential.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let message: IncomingFrame =
            serde_json::from_str(r#"{"type":"message","conversationId":"conv-7","content":"hi"}"#)
                .expect("message frame should parse");
        match message {
            IncomingFrame::Message { content, .. } => assert_eq!(content, "hi"),
            other => panic!("unexpected frame: {other:?}"),
        }

        assert!(
            serde_json::from_str::<IncomingFrame>(r#"{"type":"bogus"}"#).is_err(),
            "unknown frame types must not parse"
        );
    }
}
