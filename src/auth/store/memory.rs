//! In-memory store for tests and DSN-less deployments.
//!
//! Attempt records sit behind a mutex so the failure transition is serialized
//! per key. Sessions use a read/write lock: validation is read-mostly and
//! concurrent lookups never block each other, only mutations take the write
//! side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{AttemptStore, SessionRecord, SessionStore, StoreError};
use crate::auth::attempts::{advance, AttemptRecord, LockoutPolicy};

#[derive(Default)]
pub struct MemoryStore {
    attempts: Mutex<HashMap<(Uuid, String), AttemptRecord>>,
    sessions: RwLock<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn record_failure(
        &self,
        identity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<AttemptRecord, StoreError> {
        let mut attempts = self.attempts.lock().await;
        let key = (identity_id, device_id.to_string());
        let next = advance(attempts.get(&key), now, policy);
        attempts.insert(key, next.clone());
        Ok(next)
    }

    async fn fetch_attempts(
        &self,
        identity_id: Uuid,
        device_id: &str,
    ) -> Result<Option<AttemptRecord>, StoreError> {
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .get(&(identity_id, device_id.to_string()))
            .cloned())
    }

    async fn clear_attempts(&self, identity_id: Uuid, device_id: &str) -> Result<(), StoreError> {
        let mut attempts = self.attempts.lock().await;
        attempts.remove(&(identity_id, device_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn replace_pair(&self, record: SessionRecord) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let mut superseded = 0;
        for session in sessions.values_mut() {
            if session.identity_id == record.identity_id
                && session.device_id == record.device_id
                && !session.revoked
            {
                session.revoked = true;
                superseded += 1;
            }
        }
        sessions.insert(record.token_hash.clone(), record);
        Ok(superseded)
    }

    async fn fetch(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(token_hash).cloned())
    }

    async fn touch(
        &self,
        token_hash: &[u8],
        last_activity_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(token_hash) {
            session.last_activity_at = last_activity_at;
            session.expires_at = expires_at;
        }
        Ok(())
    }

    async fn revoke(&self, token_hash: &[u8]) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token_hash) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_identity(&self, identity_id: Uuid) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.identity_id == identity_id && !session.revoked {
                session.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn rotate_csrf(
        &self,
        token_hash: &[u8],
        expected: &[u8],
        next: &[u8],
    ) -> Result<bool, StoreError> {
        // Compare-and-swap under the write lock: a replayed token loses the
        // race exactly once and every later attempt sees the rotated hash.
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token_hash) {
            Some(session)
                if !session.revoked && session.csrf_hash.ct_eq(expected).into() =>
            {
                session.csrf_hash = next.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.revoked && session.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).expect("valid timestamp")
    }

    fn record(token_hash: &[u8], identity_id: Uuid, device_id: &str) -> SessionRecord {
        SessionRecord {
            token_hash: token_hash.to_vec(),
            identity_id,
            device_id: device_id.to_string(),
            issued_at: at(0),
            expires_at: at(1800),
            last_activity_at: at(0),
            revoked: false,
            csrf_hash: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn replace_pair_supersedes_the_previous_session() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let identity = Uuid::new_v4();

        assert_eq!(
            store.replace_pair(record(b"first", identity, "tablet-1")).await?,
            0
        );
        assert_eq!(
            store
                .replace_pair(record(b"second", identity, "tablet-1"))
                .await?,
            1
        );

        let first = store.fetch(b"first").await?.expect("first session");
        let second = store.fetch(b"second").await?.expect("second session");
        assert!(first.revoked);
        assert!(!second.revoked);
        Ok(())
    }

    #[tokio::test]
    async fn replace_pair_leaves_other_devices_alone() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let identity = Uuid::new_v4();

        store.replace_pair(record(b"a", identity, "tablet-1")).await?;
        store.replace_pair(record(b"b", identity, "tablet-2")).await?;

        assert!(!store.fetch(b"a").await?.expect("session a").revoked);
        assert!(!store.fetch(b"b").await?.expect("session b").revoked);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store
            .replace_pair(record(b"tok", Uuid::new_v4(), "tablet-1"))
            .await?;

        assert!(store.revoke(b"tok").await?);
        assert!(!store.revoke(b"tok").await?);
        assert!(!store.revoke(b"missing").await?);
        Ok(())
    }

    #[tokio::test]
    async fn rotate_csrf_accepts_a_token_at_most_once() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store
            .replace_pair(record(b"tok", Uuid::new_v4(), "tablet-1"))
            .await?;

        assert!(store.rotate_csrf(b"tok", &[1, 2, 3], &[9, 9, 9]).await?);
        // Replay of the consumed hash fails; the rotated one works.
        assert!(!store.rotate_csrf(b"tok", &[1, 2, 3], &[8, 8, 8]).await?);
        assert!(store.rotate_csrf(b"tok", &[9, 9, 9], &[7, 7, 7]).await?);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_drops_expired_and_revoked_sessions() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let identity = Uuid::new_v4();
        store.replace_pair(record(b"live", identity, "tablet-1")).await?;
        store
            .replace_pair(record(b"dead", Uuid::new_v4(), "tablet-2"))
            .await?;
        store.revoke(b"dead").await?;

        assert_eq!(store.sweep(at(10)).await?, 1);
        assert_eq!(store.sweep(at(3600)).await?, 1);
        assert!(store.fetch(b"live").await?.is_none());
        Ok(())
    }
}
