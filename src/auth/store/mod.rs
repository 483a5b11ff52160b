//! Keyed storage behind the attempt tracker and session manager.
//!
//! Two implementations: an in-memory store for tests and DSN-less
//! deployments, and a Postgres store for state that must survive restarts.
//! Both serialize read-modify-write per key (map lock or row lock) so the
//! lockout threshold cannot be skipped by concurrent failures, and both
//! implement CSRF rotation as a compare-and-swap so a token is accepted at
//! most once.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgAuditSink, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use uuid::Uuid;

use super::attempts::{AttemptRecord, LockoutPolicy};

/// Transient storage fault. Callers retry once with a short backoff before
/// surfacing `AuthError::StoreUnavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub token_hash: Vec<u8>,
    pub identity_id: Uuid,
    pub device_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub revoked: bool,
    pub csrf_hash: Vec<u8>,
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Apply the failure transition under per-key serialization and return
    /// the resulting record.
    async fn record_failure(
        &self,
        identity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<AttemptRecord, StoreError>;

    async fn fetch_attempts(
        &self,
        identity_id: Uuid,
        device_id: &str,
    ) -> Result<Option<AttemptRecord>, StoreError>;

    async fn clear_attempts(&self, identity_id: Uuid, device_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically revoke any active session for the record's (identity,
    /// device) pair and insert the new one. Returns how many sessions were
    /// superseded.
    async fn replace_pair(&self, record: SessionRecord) -> Result<u64, StoreError>;

    async fn fetch(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>, StoreError>;

    /// Record activity and the extended expiry on a validated session.
    async fn touch(
        &self,
        token_hash: &[u8],
        last_activity_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Idempotent. Returns whether a live session was actually revoked.
    async fn revoke(&self, token_hash: &[u8]) -> Result<bool, StoreError>;

    /// Revoke every active session for an identity (PIN reset, deactivation).
    async fn revoke_identity(&self, identity_id: Uuid) -> Result<u64, StoreError>;

    /// One-time-use CSRF rotation: install `next` only if the stored hash
    /// still equals `expected`. Returns false on a stale or replayed token.
    async fn rotate_csrf(
        &self,
        token_hash: &[u8],
        expected: &[u8],
        next: &[u8],
    ) -> Result<bool, StoreError>;

    /// Drop expired and revoked sessions. Returns how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Run a store operation, retrying once after a short backoff on
/// `Unavailable`. The retry hides a blip; a real outage still surfaces.
pub(crate) async fn with_retry<T, Fut>(
    backoff: std::time::Duration,
    op: impl Fn() -> Fut,
) -> Result<T, StoreError>
where
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(StoreError::Unavailable) => {
            tokio::time::sleep(backoff).await;
            op().await
        }
        result => result,
    }
}
