use thiserror::Error;

/// Errors produced by companion collaborators.
///
/// Both variants are degraded-service conditions for the pipeline: a
/// failed score means the message goes unscored, a failed reply means the
/// human message stands alone. Neither is surfaced to the sender.
#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("reply generation failed: {0}")]
    ReplyGeneration(String),
}
