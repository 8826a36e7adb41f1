//! Message and anonymous-session persistence for the Solace session core.
//!
//! Implements durable message writes, history retrieval, emotion-score
//! attachment, and the anonymous-session ledger backing the free-message
//! quota.
//!
//! Conversations are the grouping primitive. They are never created
//! explicitly: the first persisted message for a conversation id creates
//! the row, matching the implicit room lifecycle of the live layer. All
//! functions operate on a borrowed `rusqlite::Connection`; async callers
//! check one out of the pool inside `tokio::task::spawn_blocking`.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use solace_types::{EmotionScore, MessageRole};
use thiserror::Error;

/// Errors that can occur during chat persistence operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Internal database ID.
    pub id: i64,
    /// Public ID of the conversation this message belongs to.
    pub conversation_id: String,
    /// Unique public ID of the message.
    pub message_id: String,
    /// Author role.
    pub role: MessageRole,
    /// Message content (text).
    pub content: String,
    /// Authenticated author, if any.
    pub sender_user_id: Option<String>,
    /// Anonymous session token, set for anonymous human messages.
    pub session_token: Option<String>,
    /// Emotion score attached by the scoring step, if any.
    pub score: Option<EmotionScore>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Parameters for persisting a new message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageParams {
    pub conversation_id: String,
    pub message_id: String,
    pub role: MessageRole,
    pub content: String,
    pub sender_user_id: Option<String>,
    pub session_token: Option<String>,
    /// Score already known at insert time (the assistant reply carries the
    /// score computed for the triggering human message).
    pub score: Option<EmotionScore>,
}

/// An anonymous visitor session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnonymousSession {
    /// Internal database ID.
    pub id: i64,
    /// Opaque session token.
    pub session_token: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last-activity timestamp (ISO 8601).
    pub last_seen_at: String,
}

/// Persists a new message, implicitly creating the conversation row on
/// first use.
///
/// The returned record carries the durable id and timestamp assigned by the
/// database; callers must broadcast only what this function returned, so
/// subscribers never observe a message that a concurrent history read
/// could not see.
pub fn create_message(
    conn: &Connection,
    params: &CreateMessageParams,
) -> Result<Message, ChatError> {
    conn.execute(
        "INSERT OR IGNORE INTO conversations (conversation_id) VALUES (?1)",
        [&params.conversation_id],
    )?;

    let labels_json = params
        .score
        .as_ref()
        .map(|s| serde_json::to_string(&s.labels))
        .transpose()?;
    let valence = params.score.as_ref().map(|s| s.valence);

    let message = conn.query_row(
        "INSERT INTO messages (
            conversation_id, message_id, role, content,
            sender_user_id, session_token, valence, labels_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING id, conversation_id, message_id, role, content,
            sender_user_id, session_token, valence, labels_json, created_at",
        params![
            params.conversation_id,
            params.message_id,
            params.role.as_str(),
            params.content,
            params.sender_user_id,
            params.session_token,
            valence,
            labels_json,
        ],
        map_row_to_message,
    )?;

    Ok(message)
}

/// Retrieves a message by its public ID.
pub fn get_message(conn: &Connection, message_id: &str) -> Result<Message, ChatError> {
    conn.query_row(
        "SELECT id, conversation_id, message_id, role, content,
            sender_user_id, session_token, valence, labels_json, created_at
        FROM messages WHERE message_id = ?1",
        [message_id],
        map_row_to_message,
    )
    .optional()?
    .ok_or_else(|| ChatError::NotFound(message_id.to_string()))
}

/// Lists messages in a conversation, newest first, with pagination.
///
/// If `before` is provided, returns messages created before that timestamp.
/// `limit` defaults to 50 and is capped at 100.
pub fn list_messages(
    conn: &Connection,
    conversation_id: &str,
    before: Option<String>,
    limit: Option<u32>,
) -> Result<Vec<Message>, ChatError> {
    let limit = limit.unwrap_or(50).min(100);

    let sql = if before.is_some() {
        format!(
            "SELECT id, conversation_id, message_id, role, content,
                sender_user_id, session_token, valence, labels_json, created_at
            FROM messages
            WHERE conversation_id = ?1 AND created_at < ?2
            ORDER BY created_at DESC, id DESC
            LIMIT {}",
            limit
        )
    } else {
        format!(
            "SELECT id, conversation_id, message_id, role, content,
                sender_user_id, session_token, valence, labels_json, created_at
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT {}",
            limit
        )
    };

    let mut stmt = conn.prepare(&sql)?;

    let rows = if let Some(before_ts) = before {
        stmt.query_map(params![conversation_id, before_ts], map_row_to_message)?
    } else {
        stmt.query_map(params![conversation_id], map_row_to_message)?
    };

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Counts human-authored messages for an anonymous session.
///
/// This is the authoritative quota counter. It is always derived from
/// persisted rows at call time — never cached — so the count survives
/// process restarts and cannot be skipped by a client retry.
pub fn count_human_messages(conn: &Connection, session_token: &str) -> Result<i64, ChatError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE session_token = ?1 AND role = 'human'",
        [session_token],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Attaches an emotion score to an already-persisted message.
pub fn append_score(
    conn: &Connection,
    message_id: &str,
    score: &EmotionScore,
) -> Result<(), ChatError> {
    let labels_json = serde_json::to_string(&score.labels)?;
    let count = conn.execute(
        "UPDATE messages SET valence = ?1, labels_json = ?2 WHERE message_id = ?3",
        params![score.valence, labels_json, message_id],
    )?;
    if count == 0 {
        return Err(ChatError::NotFound(message_id.to_string()));
    }
    Ok(())
}

/// Creates the anonymous session row on first contact, or bumps its
/// last-activity timestamp on every subsequent contact.
pub fn touch_anonymous_session(conn: &Connection, session_token: &str) -> Result<(), ChatError> {
    conn.execute(
        "INSERT INTO anonymous_sessions (session_token) VALUES (?1)
         ON CONFLICT(session_token) DO UPDATE SET last_seen_at = datetime('now')",
        [session_token],
    )?;
    Ok(())
}

/// Retrieves an anonymous session by token, if it has made contact before.
pub fn get_anonymous_session(
    conn: &Connection,
    session_token: &str,
) -> Result<Option<AnonymousSession>, ChatError> {
    let session = conn
        .query_row(
            "SELECT id, session_token, created_at, last_seen_at
            FROM anonymous_sessions WHERE session_token = ?1",
            [session_token],
            map_row_to_session,
        )
        .optional()?;
    Ok(session)
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let role = MessageRole::from_str(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown message role: {role_str}").into(),
        )
    })?;

    let valence: Option<f64> = row.get(7)?;
    let labels_json: Option<String> = row.get(8)?;
    let score = match (valence, labels_json) {
        (Some(valence), Some(json)) => {
            let labels = serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Some(EmotionScore { valence, labels })
        }
        _ => None,
    };

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_id: row.get(2)?,
        role,
        content: row.get(4)?,
        sender_user_id: row.get(5)?,
        session_token: row.get(6)?,
        score,
        created_at: row.get(9)?,
    })
}

fn map_row_to_session(row: &Row) -> rusqlite::Result<AnonymousSession> {
    Ok(AnonymousSession {
        id: row.get(0)?,
        session_token: row.get(1)?,
        created_at: row.get(2)?,
        last_seen_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use solace_db::run_migrations;
    use solace_types::LabelIntensity;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        conn
    }

    fn human_params(conversation: &str, message_id: &str, content: &str) -> CreateMessageParams {
        CreateMessageParams {
            conversation_id: conversation.to_string(),
            message_id: message_id.to_string(),
            role: MessageRole::Human,
            content: content.to_string(),
            sender_user_id: None,
            session_token: Some("anon-1".to_string()),
            score: None,
        }
    }

    #[test]
    fn test_message_lifecycle() {
        let conn = setup_db();

        let msg = create_message(&conn, &human_params("conv-7", "msg-1", "hello"))
            .expect("create message failed");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.role, MessageRole::Human);
        assert!(msg.score.is_none());

        // The conversation row was created implicitly.
        let conv_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversations WHERE conversation_id = 'conv-7'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(conv_count, 1);

        // A second message reuses the conversation row.
        create_message(&conn, &human_params("conv-7", "msg-2", "again"))
            .expect("second create failed");
        let conv_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(conv_count, 1);

        let fetched = get_message(&conn, "msg-1").expect("get message failed");
        assert_eq!(fetched.content, "hello");

        let messages = list_messages(&conn, "conv-7", None, None).expect("list failed");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_id, "msg-2"); // Reverse chronological
        assert_eq!(messages[1].message_id, "msg-1");
    }

    #[test]
    fn test_get_message_not_found() {
        let conn = setup_db();
        let err = get_message(&conn, "ghost").unwrap_err();
        match err {
            ChatError::NotFound(id) => assert_eq!(id, "ghost"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_assistant_message_with_score_at_insert() {
        let conn = setup_db();

        let score = EmotionScore {
            valence: -0.5,
            labels: vec![LabelIntensity {
                label: "sadness".to_string(),
                intensity: 0.8,
            }],
        };
        let params = CreateMessageParams {
            conversation_id: "conv-1".to_string(),
            message_id: "reply-1".to_string(),
            role: MessageRole::Assistant,
            content: "I hear you.".to_string(),
            sender_user_id: None,
            session_token: None,
            score: Some(score.clone()),
        };

        let msg = create_message(&conn, &params).expect("create failed");
        assert_eq!(msg.score, Some(score));

        let fetched = get_message(&conn, "reply-1").expect("get failed");
        assert_eq!(fetched.score.as_ref().map(|s| s.valence), Some(-0.5));
    }

    #[test]
    fn test_append_score() {
        let conn = setup_db();
        create_message(&conn, &human_params("conv-1", "msg-1", "worried about work"))
            .expect("create failed");

        let score = EmotionScore {
            valence: -0.3,
            labels: vec![LabelIntensity {
                label: "anxiety".to_string(),
                intensity: 0.6,
            }],
        };
        append_score(&conn, "msg-1", &score).expect("append failed");

        let fetched = get_message(&conn, "msg-1").expect("get failed");
        assert_eq!(fetched.score, Some(score));

        let err = append_score(
            &conn,
            "ghost",
            &EmotionScore {
                valence: 0.0,
                labels: vec![],
            },
        )
        .unwrap_err();
        match err {
            ChatError::NotFound(_) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_count_human_messages_by_session() {
        let conn = setup_db();

        create_message(&conn, &human_params("conv-1", "msg-1", "one")).unwrap();
        create_message(&conn, &human_params("conv-2", "msg-2", "two")).unwrap();

        // Assistant replies and other sessions do not count.
        create_message(
            &conn,
            &CreateMessageParams {
                conversation_id: "conv-1".to_string(),
                message_id: "reply-1".to_string(),
                role: MessageRole::Assistant,
                content: "reply".to_string(),
                sender_user_id: None,
                session_token: None,
                score: None,
            },
        )
        .unwrap();
        let mut other = human_params("conv-1", "msg-3", "other");
        other.session_token = Some("anon-2".to_string());
        create_message(&conn, &other).unwrap();

        assert_eq!(count_human_messages(&conn, "anon-1").unwrap(), 2);
        assert_eq!(count_human_messages(&conn, "anon-2").unwrap(), 1);
        assert_eq!(count_human_messages(&conn, "anon-none").unwrap(), 0);
    }

    #[test]
    fn test_anonymous_session_touch() {
        let conn = setup_db();

        assert!(get_anonymous_session(&conn, "anon-1").unwrap().is_none());

        touch_anonymous_session(&conn, "anon-1").expect("first touch failed");
        let first = get_anonymous_session(&conn, "anon-1")
            .unwrap()
            .expect("session should exist after first touch");

        touch_anonymous_session(&conn, "anon-1").expect("second touch failed");
        let second = get_anonymous_session(&conn, "anon-1").unwrap().unwrap();

        assert_eq!(first.id, second.id, "touch must not create a second row");
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_list_messages_pagination() {
        let conn = setup_db();

        for i in 0..5 {
            create_message(
                &conn,
                &human_params("conv-1", &format!("msg-{i}"), &format!("m{i}")),
            )
            .unwrap();
        }

        let limited = list_messages(&conn, "conv-1", None, Some(2)).expect("list failed");
        assert_eq!(limited.len(), 2);

        // Messages from other conversations are not returned.
        let other = list_messages(&conn, "conv-other", None, None).expect("list failed");
        assert!(other.is_empty());
    }
}
