//! Keyword-pattern reply generator.

use futures_util::future::BoxFuture;

use crate::{CompanionError, ReplyGenerator};

/// A reply pattern: if any trigger word appears in the message, the
/// template is used. Patterns are checked in order; first match wins.
struct Pattern {
    triggers: &'static [&'static str],
    template: &'static str,
}

const PATTERNS: &[Pattern] = &[
    Pattern {
        triggers: &["anxious", "anxiety", "worried", "panic", "overwhelmed"],
        template: "It sounds like a lot is weighing on you right now. \
                   Would it help to talk through what feels most pressing?",
    },
    Pattern {
        triggers: &["sad", "down", "depressed", "lonely", "hopeless"],
        template: "I'm sorry you're feeling this way. Those feelings are \
                   real, and you don't have to carry them alone. What has \
                   today been like for you?",
    },
    Pattern {
        triggers: &["angry", "furious", "frustrated", "annoyed"],
        template: "That sounds genuinely frustrating. Sometimes naming \
                   what set it off makes it easier to look at — what \
                   happened?",
    },
    Pattern {
        triggers: &["sleep", "tired", "exhausted", "insomnia"],
        template: "Rest matters more than we give it credit for. How has \
                   your sleep been over the past week?",
    },
    Pattern {
        triggers: &["happy", "grateful", "better", "hopeful", "proud"],
        template: "I'm glad to hear that. What do you think contributed \
                   to it? Noticing what helps is worth holding onto.",
    },
];

/// Used when no pattern matches.
const FALLBACK_REPLY: &str = "Thank you for sharing that with me. \
                              Tell me more about how that's been for you.";

/// The keyword-pattern responder currently shipped by the platform.
///
/// Like [`crate::KeywordScorer`], it is pure, deterministic, and
/// infallible; the [`ReplyGenerator`] trait boundary exists so a
/// model-backed generator can replace it.
#[derive(Debug, Clone, Default)]
pub struct TemplateResponder;

impl TemplateResponder {
    pub fn new() -> Self {
        Self
    }

    fn reply_to(text: &str) -> String {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        for pattern in PATTERNS {
            if words.iter().any(|w| pattern.triggers.contains(&w.as_str())) {
                return pattern.template.to_string();
            }
        }
        FALLBACK_REPLY.to_string()
    }
}

impl ReplyGenerator for TemplateResponder {
    fn reply<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, CompanionError>> {
        Box::pin(async move { Ok(Self::reply_to(text)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matches_first_applicable_pattern() {
        let responder = TemplateResponder::new();
        let reply = responder
            .reply("I've been so anxious lately")
            .await
            .expect("reply should not fail");
        assert!(reply.contains("weighing on you"));
    }

    #[tokio::test]
    async fn falls_back_on_unmatched_text() {
        let responder = TemplateResponder::new();
        let reply = responder.reply("the weather changed").await.unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn distinct_patterns_produce_distinct_replies() {
        let responder = TemplateResponder::new();
        let sad = responder.reply("feeling very sad").await.unwrap();
        let angry = responder.reply("I'm so frustrated").await.unwrap();
        assert_ne!(sad, angry);
    }

    #[tokio::test]
    async fn reply_is_deterministic() {
        let responder = TemplateResponder::new();
        let a = responder.reply("can't sleep at night").await.unwrap();
        let b = responder.reply("can't sleep at night").await.unwrap();
        assert_eq!(a, b);
    }
}
