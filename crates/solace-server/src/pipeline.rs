//! The ordered sequence of effects for one inbound chat message.
//!
//! For each message: quota check (anonymous flow only), durable write,
//! fan-out of the human message, emotion scoring, reply generation,
//! durable write of the reply, fan-out of the reply. Persistence always
//! completes before the corresponding broadcast, so a subscriber that
//! immediately queries history can never miss a message it just saw.
//!
//! Invocations for the same room are serialized on a per-room lock: the
//! broadcasts of message B can never be observed between the broadcasts of
//! message A. Distinct rooms run fully in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use solace_chat::{CreateMessageParams, Message};
use solace_companion::{EmotionScorer, ReplyGenerator};
use solace_db::DbPool;
use solace_types::{EmotionScore, MessageRole};

use crate::api_ws::{OutgoingFrame, WsMessagePayload};
use crate::broadcast::RoomBroadcaster;
use crate::quota::QuotaLedger;
use crate::registry::room_key;

/// Who submitted an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Author {
    /// An unauthenticated visitor, subject to the free-message quota.
    Anonymous { session_token: String },
    /// An authenticated user; no quota applies.
    User { user_id: String },
}

/// Result of a completed (possibly degraded) pipeline invocation.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The persisted human message.
    pub human: Message,
    /// The persisted assistant reply; `None` when the reply path degraded.
    pub reply: Option<Message>,
    /// Free messages left for anonymous authors; `None` for users.
    pub remaining: Option<i64>,
}

/// Fatal pipeline outcomes, surfaced to the sender.
///
/// Everything else (scoring, reply generation, reply persistence) degrades
/// in place: the human message stays delivered and the pipeline completes
/// without the missing artifact.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The anonymous session has exhausted its free messages. Nothing was
    /// persisted or broadcast; recoverable only by upgrading.
    #[error("anonymous session has exhausted its free messages")]
    QuotaExceeded,

    /// The human message could not be durably written (or the quota count
    /// could not be read). The message is not considered delivered and the
    /// sender may retry the whole send.
    #[error("message persistence failed: {0}")]
    Persistence(String),
}

/// Executes the message pipeline against its collaborators.
///
/// Collaborators are injected at construction so isolated instances can be
/// tested side by side, and so the scorer/responder can be swapped for
/// model-backed services.
pub struct MessagePipeline {
    pool: DbPool,
    quota: QuotaLedger,
    broadcaster: RoomBroadcaster,
    scorer: Arc<dyn EmotionScorer>,
    responder: Arc<dyn ReplyGenerator>,
    /// Per-room serialization locks. tokio's Mutex is fair, so waiters run
    /// in submission order. Entries are removed once uncontended.
    room_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MessagePipeline {
    pub fn new(
        pool: DbPool,
        quota: QuotaLedger,
        broadcaster: RoomBroadcaster,
        scorer: Arc<dyn EmotionScorer>,
        responder: Arc<dyn ReplyGenerator>,
    ) -> Self {
        Self {
            pool,
            quota,
            broadcaster,
            scorer,
            responder,
            room_locks: DashMap::new(),
        }
    }

    /// Runs the full pipeline for one inbound message.
    pub async fn handle_inbound(
        &self,
        conversation_id: &str,
        author: &Author,
        content: &str,
    ) -> Result<Delivery, PipelineError> {
        let room = room_key(conversation_id);

        let lock = self
            .room_locks
            .entry(room.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let result = self.run(conversation_id, &room, author, content).await;

        drop(guard);
        drop(lock);
        self.room_locks
            .remove_if(&room, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn run(
        &self,
        conversation_id: &str,
        room: &str,
        author: &Author,
        content: &str,
    ) -> Result<Delivery, PipelineError> {
        // 1. Quota gate for the anonymous flow. Denial terminates before
        //    anything is persisted or broadcast.
        let remaining = match author {
            Author::Anonymous { session_token } => {
                let decision = self
                    .quota
                    .check_and_reserve(session_token)
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;
                if !decision.allowed {
                    return Err(PipelineError::QuotaExceeded);
                }
                Some(decision.remaining)
            }
            Author::User { .. } => None,
        };

        // 2. Durable write of the human message. Fatal on failure.
        let (sender_user_id, session_token) = match author {
            Author::Anonymous { session_token } => (None, Some(session_token.clone())),
            Author::User { user_id } => (Some(user_id.clone()), None),
        };
        let human = self
            .persist(
                CreateMessageParams {
                    conversation_id: conversation_id.to_string(),
                    message_id: Uuid::new_v4().to_string(),
                    role: MessageRole::Human,
                    content: content.to_string(),
                    sender_user_id,
                    session_token: session_token.clone(),
                    score: None,
                },
                session_token,
            )
            .await
            .map_err(PipelineError::Persistence)?;

        // 3. Fan out the persisted human message.
        self.broadcast_message(room, &human);

        // 4. Score the content. A missing score is degraded service, not a
        //    failure; the annotation write is equally non-fatal.
        let score = match self.scorer.score(content).await {
            Ok(score) => {
                if let Err(e) = self.annotate(&human.message_id, &score).await {
                    tracing::warn!(
                        message_id = %human.message_id,
                        "failed to attach emotion score: {}",
                        e
                    );
                }
                Some(score)
            }
            Err(e) => {
                tracing::warn!(conversation_id, "emotion scoring failed: {}", e);
                None
            }
        };

        // 5. Generate the reply. From here on, failure degrades to "human
        //    message delivered, no assistant reply" — the human message is
        //    never rolled back or re-broadcast.
        let reply_text = match self.responder.reply(content).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(conversation_id, "reply generation failed: {}", e);
                return Ok(Delivery {
                    human,
                    reply: None,
                    remaining,
                });
            }
        };

        // 6. Durable write of the reply, carrying the score from step 4.
        let reply = match self
            .persist(
                CreateMessageParams {
                    conversation_id: conversation_id.to_string(),
                    message_id: Uuid::new_v4().to_string(),
                    role: MessageRole::Assistant,
                    content: reply_text,
                    sender_user_id: None,
                    session_token: None,
                    score,
                },
                None,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(conversation_id, "failed to persist reply: {}", e);
                return Ok(Delivery {
                    human,
                    reply: None,
                    remaining,
                });
            }
        };

        // 7. Fan out the persisted reply.
        self.broadcast_message(room, &reply);

        Ok(Delivery {
            human,
            reply: Some(reply),
            remaining,
        })
    }

    /// Writes a message (and the anonymous-session touch, when
    /// applicable) on the blocking pool.
    async fn persist(
        &self,
        params: CreateMessageParams,
        touch_session: Option<String>,
    ) -> Result<Message, String> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| format!("pool error: {e}"))?;
            if let Some(token) = &touch_session {
                solace_chat::touch_anonymous_session(&conn, token)
                    .map_err(|e| format!("session touch error: {e}"))?;
            }
            solace_chat::create_message(&conn, &params).map_err(|e| format!("db error: {e}"))
        })
        .await
        .map_err(|e| format!("task join error: {e}"))?
    }

    /// Attaches an emotion score to an already-persisted message.
    async fn annotate(&self, message_id: &str, score: &EmotionScore) -> Result<(), String> {
        let pool = self.pool.clone();
        let message_id = message_id.to_string();
        let score = score.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| format!("pool error: {e}"))?;
            solace_chat::append_score(&conn, &message_id, &score)
                .map_err(|e| format!("db error: {e}"))
        })
        .await
        .map_err(|e| format!("task join error: {e}"))?
    }

    fn broadcast_message(&self, room: &str, message: &Message) {
        let payload: WsMessagePayload = message.clone().into();
        let frame = OutgoingFrame::Message(payload);
        match serde_json::to_string(&frame) {
            Ok(json) => {
                self.broadcaster.broadcast(room, &json, None);
            }
            Err(e) => {
                tracing::error!(room, "failed to serialize message frame for broadcast: {}", e);
            }
        }
    }
}
