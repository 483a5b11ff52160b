//! Error taxonomy for the authentication core.
//!
//! Everything user-facing collapses into one of these variants; handlers map
//! them to HTTP statuses without leaking whether an identity exists or which
//! throttle fired.

use super::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Too many raw attempts from this device or address.
    #[error("rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    /// The (identity, device) pair is locked out after repeated failures.
    #[error("locked out, retry in {retry_after_seconds}s")]
    Locked { retry_after_seconds: u64 },
    /// Wrong PIN, unknown identity, or deactivated identity. Callers cannot
    /// tell these apart; the audit trail records the distinction.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Session passed its idle or absolute lifetime.
    #[error("session expired")]
    Expired,
    /// Session was revoked (logout, PIN reset, deactivation, or supersession).
    #[error("session revoked")]
    Revoked,
    /// No session matches the presented token.
    #[error("session not found")]
    NotFound,
    /// Anti-forgery token missing, stale, or replayed.
    #[error("csrf token mismatch")]
    CsrfMismatch,
    /// Transient storage fault, already retried once internally.
    #[error("store unavailable")]
    StoreUnavailable,
}

impl From<StoreError> for AuthError {
    fn from(_: StoreError) -> Self {
        Self::StoreUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_maps_to_store_unavailable() {
        assert_eq!(
            AuthError::from(StoreError::Unavailable),
            AuthError::StoreUnavailable
        );
    }

    #[test]
    fn display_includes_retry_hint() {
        let err = AuthError::Locked {
            retry_after_seconds: 30,
        };
        assert_eq!(err.to_string(), "locked out, retry in 30s");
    }
}
