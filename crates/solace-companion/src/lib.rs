//! Companion collaborators for the Solace session core: emotion scoring
//! and reply generation.
//!
//! Both collaborators have a fixed request/response contract — text in,
//! score or reply out — so the live message pipeline never depends on how
//! they are implemented. The implementations shipped here are the
//! platform's current keyword heuristics; a model-backed service can
//! replace either one without touching the pipeline.

pub mod error;
pub mod responder;
pub mod scorer;

use futures_util::future::BoxFuture;
use solace_types::EmotionScore;

pub use error::CompanionError;
pub use responder::TemplateResponder;
pub use scorer::KeywordScorer;

/// Scores the emotional content of a message.
///
/// Methods return boxed futures so the trait stays object-safe: the
/// pipeline holds collaborators as `Arc<dyn EmotionScorer>` and swaps
/// implementations freely (tests inject failing ones).
pub trait EmotionScorer: Send + Sync {
    /// Scores `text`, returning overall valence and per-label intensities.
    fn score<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<EmotionScore, CompanionError>>;
}

/// Generates the companion reply to a human message.
pub trait ReplyGenerator: Send + Sync {
    /// Produces reply text for `text`.
    fn reply<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<String, CompanionError>>;
}
