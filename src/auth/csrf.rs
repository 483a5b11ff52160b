//! Per-session anti-forgery tokens with rotation on use.
//!
//! Each session carries exactly one valid CSRF token at a time, stored as a
//! SHA-256 hash next to the session. Validation consumes the token: the store
//! swaps in the hash of a freshly minted replacement only if the presented
//! one still matches, so a token mutates state at most once even under
//! concurrent replay.

use anyhow::Result;
use std::sync::Arc;

use super::store::{SessionStore, StoreError};
use super::tokens::{generate_token, hash_token};

pub struct CsrfGuard {
    sessions: Arc<dyn SessionStore>,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Mint the initial token for a new session. Returns the raw token for
    /// the client and the hash for the session record.
    pub(crate) fn issue() -> Result<(String, Vec<u8>)> {
        let token = generate_token()?;
        let hash = hash_token(&token);
        Ok((token, hash))
    }

    /// Consume `presented` and rotate. `Ok(Some(next))` carries the raw
    /// replacement token; `Ok(None)` means the token was stale, replayed, or
    /// simply wrong, and the caller must reject the request.
    pub(crate) async fn validate_and_rotate(
        &self,
        session_token_hash: &[u8],
        presented: &str,
    ) -> Result<Option<String>, StoreError> {
        let next = generate_token().map_err(|err| {
            tracing::error!("Failed to mint csrf token: {err}");
            StoreError::Unavailable
        })?;
        let rotated = self
            .sessions
            .rotate_csrf(session_token_hash, &hash_token(presented), &hash_token(&next))
            .await?;
        Ok(rotated.then_some(next))
    }
}
