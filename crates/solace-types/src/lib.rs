//! Shared types and constants for the Solace session core.
//!
//! This crate provides the foundational types used across all Solace
//! crates: message roles, emotion scores, and delivery acknowledgement
//! statuses. No crate in the workspace depends on anything *except*
//! `solace-types` for cross-cutting type definitions, which keeps the
//! dependency graph clean and prevents circular dependencies.

use serde::{Deserialize, Serialize};

/// Number of human messages an anonymous session may send before it must
/// upgrade to an account. A hard business rule, enforced against persisted
/// history rather than in-memory counters so it survives restarts.
pub const FREE_MESSAGE_LIMIT: i64 = 20;

/// Maximum allowed length for inbound message content (16 KiB).
pub const MAX_MESSAGE_CONTENT_LEN: usize = 16_384;

/// Who authored a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// A person (authenticated user or anonymous visitor).
    Human,
    /// The generated companion reply.
    Assistant,
}

impl MessageRole {
    /// Returns the stable string encoding used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }

    /// Attempts to parse the database encoding back into a role.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Intensity of a single emotion label detected in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelIntensity {
    /// Emotion label (e.g. "anxiety", "joy").
    pub label: String,
    /// Intensity in [0.0, 1.0].
    pub intensity: f64,
}

/// Result of scoring a message's emotional content.
///
/// `valence` summarizes overall tone in [-1.0, 1.0] (negative to positive);
/// `labels` carries per-emotion intensities. Produced by the scorer
/// collaborator and attached to persisted messages after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub valence: f64,
    pub labels: Vec<LabelIntensity>,
}

/// Synchronous acknowledgement returned to the sender of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// The human message was persisted and broadcast.
    Delivered,
    /// The anonymous session has exhausted its free messages.
    QuotaExceeded,
    /// The message could not be delivered; the client may retry.
    Error,
}

impl AckStatus {
    /// Returns the wire encoding of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_role_round_trips_through_db_encoding() {
        for role in [MessageRole::Human, MessageRole::Assistant] {
            assert_eq!(MessageRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::from_str("system"), None);
    }

    #[test]
    fn message_role_serde_is_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let parsed: MessageRole = serde_json::from_str("\"human\"").unwrap();
        assert_eq!(parsed, MessageRole::Human);
    }

    #[test]
    fn ack_status_serde_is_snake_case() {
        let json = serde_json::to_string(&AckStatus::QuotaExceeded).unwrap();
        assert_eq!(json, "\"quota_exceeded\"");
        assert_eq!(AckStatus::Delivered.as_str(), "delivered");
    }

    #[test]
    fn emotion_score_round_trips() {
        let score = EmotionScore {
            valence: -0.4,
            labels: vec![LabelIntensity {
                label: "anxiety".to_string(),
                intensity: 0.7,
            }],
        };
        let json = serde_json::to_string(&score).unwrap();
        let back: EmotionScore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, score);
    }
}
