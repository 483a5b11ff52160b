//! Consecutive-failure tracking and lockout per (identity, device) pair.
//!
//! State machine: Clear → Warning → Locked. A lockout that elapses drops the
//! pair back to Warning, not Clear, so the next failure escalates the backoff
//! again; only a successful verification fully resets the pair. Lockout
//! duration grows geometrically with the number of prior lockouts, capped so
//! a legitimate employee is never blocked for good.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::store::{AttemptStore, StoreError};

#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    /// Consecutive failures before the pair locks.
    pub max_failures: u32,
    /// Duration of the first lockout.
    pub base: Duration,
    /// Geometric growth factor applied per prior lockout.
    pub growth: u32,
    /// Upper bound on any single lockout.
    pub cap: Duration,
}

impl LockoutPolicy {
    /// Lockout duration for the n-th lockout (1-based), capped.
    #[must_use]
    pub fn lockout_duration(&self, lockouts: u32) -> Duration {
        let mut duration = self.base;
        for _ in 1..lockouts {
            duration = duration * i32::try_from(self.growth).unwrap_or(i32::MAX);
            if duration >= self.cap {
                return self.cap;
            }
        }
        duration.min(self.cap)
    }
}

/// Persisted per-(identity, device) counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    pub failures: u32,
    pub lockouts: u32,
    pub last_failure_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    Clear,
    Warning { failures: u32 },
    Locked { until: DateTime<Utc> },
}

/// Pure transition applied on a failed verification.
///
/// Stores call this under their per-key serialization (map lock or row lock)
/// so two concurrent failures can never both observe "below threshold".
#[must_use]
pub fn advance(
    record: Option<&AttemptRecord>,
    now: DateTime<Utc>,
    policy: &LockoutPolicy,
) -> AttemptRecord {
    let mut record = record.cloned().unwrap_or(AttemptRecord {
        failures: 0,
        lockouts: 0,
        last_failure_at: now,
        locked_until: None,
    });

    if let Some(until) = record.locked_until {
        if now < until {
            // Still locked; callers gate on is_locked first, but a racing
            // failure must not extend or restart the current lockout.
            return record;
        }
        record.locked_until = None;
    }

    record.failures = record.failures.saturating_add(1);
    record.last_failure_at = now;

    if record.failures >= policy.max_failures {
        record.lockouts = record.lockouts.saturating_add(1);
        record.locked_until = Some(now + policy.lockout_duration(record.lockouts));
        // Counter stays at the threshold: one fresh failure after the lockout
        // elapses re-locks with the escalated duration.
        record.failures = policy.max_failures;
    }

    record
}

/// Derive the externally visible state without mutating anything.
#[must_use]
pub fn state_of(record: Option<&AttemptRecord>, now: DateTime<Utc>) -> AttemptState {
    match record {
        None => AttemptState::Clear,
        Some(record) => match record.locked_until {
            Some(until) if now < until => AttemptState::Locked { until },
            _ if record.failures > 0 => AttemptState::Warning {
                failures: record.failures,
            },
            _ => AttemptState::Clear,
        },
    }
}

pub struct AttemptTracker {
    store: Arc<dyn AttemptStore>,
    policy: LockoutPolicy,
}

impl AttemptTracker {
    #[must_use]
    pub fn new(store: Arc<dyn AttemptStore>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    /// Record a failed verification and return the resulting state.
    pub async fn record_failure(
        &self,
        identity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AttemptState, StoreError> {
        let record = self
            .store
            .record_failure(identity_id, device_id, now, &self.policy)
            .await?;
        Ok(state_of(Some(&record), now))
    }

    /// A success fully resets the pair to Clear.
    pub async fn record_success(
        &self,
        identity_id: Uuid,
        device_id: &str,
    ) -> Result<(), StoreError> {
        self.store.clear_attempts(identity_id, device_id).await
    }

    /// Side-effect-free probe. Returns the remaining lockout when locked.
    pub async fn is_locked(
        &self,
        identity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, StoreError> {
        let record = self.store.fetch_attempts(identity_id, device_id).await?;
        match state_of(record.as_ref(), now) {
            AttemptState::Locked { until } => Ok(Some(until - now)),
            _ => Ok(None),
        }
    }
}
