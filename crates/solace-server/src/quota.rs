//! Free-message quota for anonymous sessions.

use solace_db::DbPool;
use solace_types::FREE_MESSAGE_LIMIT;
use thiserror::Error;

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    /// Whether the session may post another message.
    pub allowed: bool,
    /// Messages left after the one being admitted (0 when denied).
    pub remaining: i64,
}

/// Errors from the quota ledger.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// The persisted count could not be read. Callers fail closed — no
    /// message is admitted on a broken ledger.
    #[error("quota lookup failed: {0}")]
    Persistence(String),
}

/// Decides whether an anonymous session may post another message.
///
/// The count is re-derived from persisted history on every call — never
/// cached — because the quota is a hard business rule that must survive
/// process restarts. The check and the subsequent message write are two
/// separate persistence calls: two tabs racing the same token can
/// over-admit by a bounded amount, but the counter can never run backward
/// or be reset by a client retry.
#[derive(Clone)]
pub struct QuotaLedger {
    pool: DbPool,
}

impl QuotaLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Checks the persisted human-message count for `session_token`
    /// against [`FREE_MESSAGE_LIMIT`].
    pub async fn check_and_reserve(&self, session_token: &str) -> Result<QuotaDecision, QuotaError> {
        let pool = self.pool.clone();
        let token = session_token.to_string();

        let count = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| QuotaError::Persistence(format!("pool error: {e}")))?;
            solace_chat::count_human_messages(&conn, &token)
                .map_err(|e| QuotaError::Persistence(format!("count error: {e}")))
        })
        .await
        .map_err(|e| QuotaError::Persistence(format!("task join error: {e}")))??;

        if count >= FREE_MESSAGE_LIMIT {
            Ok(QuotaDecision {
                allowed: false,
                remaining: 0,
            })
        } else {
            Ok(QuotaDecision {
                allowed: true,
                remaining: FREE_MESSAGE_LIMIT - count - 1,
            })
        }
    }
}
