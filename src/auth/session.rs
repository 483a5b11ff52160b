//! Session lifecycle: login, validation, sliding expiry, revocation.
//!
//! The manager wires the verifier, attempt tracker, rate limiter, CSRF guard
//! and audit trail into the operations the HTTP layer exposes. Every
//! operation takes `now` explicitly so expiry and lockout arithmetic is
//! deterministic under test. Storage faults are retried once with a short
//! backoff before surfacing as `StoreUnavailable`.

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::attempts::{AttemptState, AttemptTracker};
use super::audit::{AuditEntry, AuditEventKind, AuditSink};
use super::config::AuthConfig;
use super::credentials::{CredentialStore, VerifyOutcome};
use super::csrf::CsrfGuard;
use super::error::AuthError;
use super::identity::{Directory, Identity};
use super::rate_limit::RateLimiter;
use super::store::{with_retry, AttemptStore, SessionRecord, SessionStore};
use super::tokens::{generate_token, hash_token};

#[derive(Clone, Copy, Debug)]
pub struct SessionPolicy {
    /// Sliding inactivity window.
    pub idle_ttl: Duration,
    /// Hard ceiling from issuance, never extended.
    pub absolute_ttl: Duration,
    /// Backoff before the single retry on a storage blip.
    pub retry_backoff: std::time::Duration,
}

/// Everything a successful login hands back to the client.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub session_token: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

/// A session that passed validation at some instant.
#[derive(Clone, Debug)]
pub struct ValidatedSession {
    pub identity: Identity,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    credentials: CredentialStore,
    attempts: AttemptTracker,
    limiter: RateLimiter,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn Directory>,
    csrf: CsrfGuard,
    audit: Arc<dyn AuditSink>,
    policy: SessionPolicy,
}

impl SessionManager {
    /// # Errors
    /// Returns an error when the credential verifier cannot be initialized.
    pub fn new(
        config: &AuthConfig,
        sessions: Arc<dyn SessionStore>,
        attempts: Arc<dyn AttemptStore>,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            credentials: CredentialStore::new(Arc::clone(&directory))?,
            attempts: AttemptTracker::new(attempts, config.lockout_policy()),
            limiter: RateLimiter::new(config.rate_limit_policy()),
            sessions: Arc::clone(&sessions),
            directory,
            csrf: CsrfGuard::new(sessions),
            audit,
            policy: config.session_policy(),
        })
    }

    /// Verify a PIN and issue a session for the (identity, device) pair,
    /// superseding any session the pair already holds.
    ///
    /// # Errors
    /// `RateLimited` and `Locked` carry a retry hint; every credential
    /// problem collapses into `InvalidCredentials`.
    pub async fn login(
        &self,
        identity_id: Uuid,
        pin: &SecretString,
        device_id: &str,
        source_addr: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AuthError> {
        if let Some(retry) = self.limiter.check(device_id, source_addr, now) {
            return Err(AuthError::RateLimited {
                retry_after_seconds: retry_seconds(retry),
            });
        }

        // The lockout gate runs before verification so a locked pair never
        // burns hashing work or leaks whether the PIN would have matched.
        let locked = with_retry(self.policy.retry_backoff, || {
            self.attempts.is_locked(identity_id, device_id, now)
        })
        .await?;
        if let Some(retry) = locked {
            return Err(AuthError::Locked {
                retry_after_seconds: retry_seconds(retry),
            });
        }

        let outcome = with_retry(self.policy.retry_backoff, || {
            self.credentials.verify(identity_id, pin)
        })
        .await?;

        match outcome {
            VerifyOutcome::Match => self.issue(identity_id, device_id, now).await,
            VerifyOutcome::Mismatch => {
                self.fail(Some(identity_id), identity_id, device_id, "wrong_pin", now)
                    .await
            }
            VerifyOutcome::UnknownIdentity => {
                // Attempts are still counted against the requested id, so an
                // attacker probing ids sees the same lockout behavior as one
                // guessing PINs.
                self.fail(None, identity_id, device_id, "unknown_identity", now)
                    .await
            }
        }
    }

    async fn issue(
        &self,
        identity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AuthError> {
        let identity = with_retry(self.policy.retry_backoff, || {
            self.directory.identity(identity_id)
        })
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

        with_retry(self.policy.retry_backoff, || {
            self.attempts.record_success(identity_id, device_id)
        })
        .await?;

        let session_token = generate_token().map_err(|err| {
            error!("Failed to mint session token: {err}");
            AuthError::StoreUnavailable
        })?;
        let (csrf_token, csrf_hash) = CsrfGuard::issue().map_err(|err| {
            error!("Failed to mint csrf token: {err}");
            AuthError::StoreUnavailable
        })?;

        let expires_at = now + self.policy.idle_ttl;
        let record = SessionRecord {
            token_hash: hash_token(&session_token),
            identity_id,
            device_id: device_id.to_string(),
            issued_at: now,
            expires_at,
            last_activity_at: now,
            revoked: false,
            csrf_hash,
        };
        let superseded = with_retry(self.policy.retry_backoff, || {
            self.sessions.replace_pair(record.clone())
        })
        .await?;

        if superseded > 0 {
            debug!(%identity_id, device_id, superseded, "superseded previous session");
            self.record(
                AuditEventKind::SessionRevoked,
                Some(identity_id),
                device_id,
                "superseded",
                now,
            );
        }
        self.record(
            AuditEventKind::LoginSuccess,
            Some(identity_id),
            device_id,
            "ok",
            now,
        );
        info!(%identity_id, device_id, "login succeeded");

        Ok(IssuedSession {
            session_token,
            csrf_token,
            expires_at,
            identity,
        })
    }

    async fn fail(
        &self,
        audit_identity: Option<Uuid>,
        identity_id: Uuid,
        device_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AuthError> {
        let state = with_retry(self.policy.retry_backoff, || {
            self.attempts.record_failure(identity_id, device_id, now)
        })
        .await?;

        self.record(
            AuditEventKind::LoginFailure,
            audit_identity,
            device_id,
            reason,
            now,
        );
        if let AttemptState::Locked { until } = state {
            self.record(
                AuditEventKind::Lockout,
                audit_identity,
                device_id,
                "threshold_reached",
                now,
            );
            info!(%identity_id, device_id, until = %until.to_rfc3339(), "pair locked out");
        }

        // The attempt that trips the lockout still reads as a plain failure;
        // the lockout only answers from the next attempt on.
        Err(AuthError::InvalidCredentials)
    }

    /// Validate a bearer session token and extend its sliding expiry.
    ///
    /// # Errors
    /// `NotFound`, `Revoked`, or `Expired` depending on what the store holds.
    pub async fn validate(
        &self,
        session_token: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSession, AuthError> {
        let token_hash = hash_token(session_token);
        let record = with_retry(self.policy.retry_backoff, || {
            self.sessions.fetch(&token_hash)
        })
        .await?
        .ok_or(AuthError::NotFound)?;

        if record.revoked {
            return Err(AuthError::Revoked);
        }
        let ceiling = record.issued_at + self.policy.absolute_ttl;
        if now >= record.expires_at || now >= ceiling {
            return Err(AuthError::Expired);
        }

        let identity = with_retry(self.policy.retry_backoff, || {
            self.directory.identity(record.identity_id)
        })
        .await?;
        let identity = match identity {
            Some(identity) if identity.active => identity,
            _ => {
                // Deactivation invalidates live sessions on next contact.
                with_retry(self.policy.retry_backoff, || {
                    self.sessions.revoke(&token_hash)
                })
                .await?;
                self.record(
                    AuditEventKind::SessionRevoked,
                    Some(record.identity_id),
                    &record.device_id,
                    "identity_deactivated",
                    now,
                );
                return Err(AuthError::Revoked);
            }
        };

        // Sliding extension, clamped to the absolute ceiling.
        let expires_at = (now + self.policy.idle_ttl).min(ceiling);
        with_retry(self.policy.retry_backoff, || {
            self.sessions.touch(&token_hash, now, expires_at)
        })
        .await?;

        Ok(ValidatedSession {
            identity,
            device_id: record.device_id,
            expires_at,
        })
    }

    /// Validate a session and consume its CSRF token. Returns the validated
    /// session together with the raw replacement token for the client.
    ///
    /// # Errors
    /// `CsrfMismatch` on a missing, stale, or replayed token, plus everything
    /// `validate` can return.
    pub async fn authorize(
        &self,
        session_token: &str,
        csrf_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(ValidatedSession, String), AuthError> {
        let session = self.validate(session_token, now).await?;
        let token_hash = hash_token(session_token);
        let next = with_retry(self.policy.retry_backoff, || {
            self.csrf.validate_and_rotate(&token_hash, csrf_token)
        })
        .await?;
        match next {
            Some(next) => Ok((session, next)),
            None => {
                self.record(
                    AuditEventKind::CsrfRejected,
                    Some(session.identity.id),
                    &session.device_id,
                    "token_mismatch",
                    now,
                );
                Err(AuthError::CsrfMismatch)
            }
        }
    }

    /// Logout. Idempotent: revoking an unknown or already-dead token is not
    /// an error.
    pub async fn revoke(&self, session_token: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let token_hash = hash_token(session_token);
        let record = with_retry(self.policy.retry_backoff, || {
            self.sessions.fetch(&token_hash)
        })
        .await?;
        let Some(record) = record else {
            return Ok(());
        };
        let revoked = with_retry(self.policy.retry_backoff, || {
            self.sessions.revoke(&token_hash)
        })
        .await?;
        if revoked {
            self.record(
                AuditEventKind::SessionRevoked,
                Some(record.identity_id),
                &record.device_id,
                "logout",
                now,
            );
        }
        Ok(())
    }

    /// Revoke every active session an identity holds, on any device.
    pub async fn revoke_all(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, AuthError> {
        let revoked = with_retry(self.policy.retry_backoff, || {
            self.sessions.revoke_identity(identity_id)
        })
        .await?;
        if revoked > 0 {
            self.record(
                AuditEventKind::SessionRevoked,
                Some(identity_id),
                "*",
                reason,
                now,
            );
        }
        Ok(revoked)
    }

    /// Replace an identity's PIN and revoke all of its sessions.
    pub async fn reset_pin(
        &self,
        identity_id: Uuid,
        new_pin: &SecretString,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        with_retry(self.policy.retry_backoff, || {
            self.credentials.set_credential(identity_id, new_pin)
        })
        .await?;
        self.revoke_all(identity_id, now, "pin_reset").await?;
        Ok(())
    }

    /// Handle for the background sweeper.
    #[must_use]
    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    fn record(
        &self,
        kind: AuditEventKind,
        identity_id: Option<Uuid>,
        device_id: &str,
        outcome: &str,
        at: DateTime<Utc>,
    ) {
        self.audit.append(AuditEntry {
            at,
            kind,
            identity_id,
            device_id: device_id.to_string(),
            outcome: outcome.to_string(),
        });
    }
}

/// Background task dropping expired and revoked sessions.
pub fn spawn_sweeper(sessions: Arc<dyn SessionStore>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sessions.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(swept) => debug!(swept, "swept sessions"),
                Err(err) => error!("Session sweep failed: {err}"),
            }
        }
    });
}

fn retry_seconds(retry: Duration) -> u64 {
    u64::try_from(retry.num_seconds().max(1)).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::audit::MemoryAuditSink;
    use crate::auth::credentials::hash_pin;
    use crate::auth::identity::{MemoryDirectory, Role};
    use crate::auth::store::MemoryStore;

    struct Fixture {
        manager: SessionManager,
        directory: Arc<MemoryDirectory>,
        audit: Arc<MemoryAuditSink>,
        identity_id: Uuid,
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).expect("valid timestamp")
    }

    fn pin(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    async fn fixture(config: AuthConfig) -> anyhow::Result<Fixture> {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let identity_id = Uuid::new_v4();
        directory
            .insert(
                Identity {
                    id: identity_id,
                    display_name: "Sam".to_string(),
                    role: Role::Staff,
                    active: true,
                },
                Some(hash_pin(&pin("4321"))?),
            )
            .await;
        let manager = SessionManager::new(
            &config,
            Arc::clone(&store) as Arc<dyn SessionStore>,
            store as Arc<dyn AttemptStore>,
            Arc::clone(&directory) as Arc<dyn Directory>,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        )?;
        Ok(Fixture {
            manager,
            directory,
            audit,
            identity_id,
        })
    }

    #[tokio::test]
    async fn login_issues_a_session_and_rotating_csrf() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let issued = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;
        assert_eq!(issued.identity.id, f.identity_id);
        assert_eq!(issued.expires_at, at(30 * 60));

        let validated = f.manager.validate(&issued.session_token, at(60)).await?;
        assert_eq!(validated.device_id, "tablet-1");

        let (_, next) = f
            .manager
            .authorize(&issued.session_token, &issued.csrf_token, at(61))
            .await?;
        assert_ne!(next, issued.csrf_token);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_pins_lock_the_pair_and_the_correct_pin_waits_out() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        for step in 0..3 {
            let err = f
                .manager
                .login(f.identity_id, &pin("0000"), "tablet-1", None, at(step))
                .await
                .expect_err("wrong pin");
            assert_eq!(err, AuthError::InvalidCredentials);
        }

        // Correct PIN during the lockout is refused with a retry hint.
        let err = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(5))
            .await
            .expect_err("locked");
        assert!(matches!(
            err,
            AuthError::Locked {
                retry_after_seconds
            } if retry_after_seconds > 0
        ));

        // After the 30s base lockout elapses, the correct PIN works.
        assert!(f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(40))
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        for step in 0..2 {
            let _ = f
                .manager
                .login(f.identity_id, &pin("0000"), "tablet-1", None, at(step))
                .await;
        }
        f.manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(2))
            .await?;

        // Two more wrong PINs stay below the threshold of three.
        for step in 3..5 {
            let _ = f
                .manager
                .login(f.identity_id, &pin("0000"), "tablet-1", None, at(step))
                .await;
        }
        assert!(f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(5))
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn a_new_login_supersedes_the_pair_session() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let first = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;
        let second = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(1))
            .await?;

        assert_eq!(
            f.manager
                .validate(&first.session_token, at(2))
                .await
                .expect_err("superseded"),
            AuthError::Revoked
        );
        assert!(f.manager.validate(&second.session_token, at(2)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn idle_expiry_slides_but_the_ceiling_holds() -> anyhow::Result<()> {
        let config = AuthConfig::new()
            .with_idle_ttl_seconds(600)
            .with_absolute_ttl_seconds(1000);
        let f = fixture(config).await?;
        let issued = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;

        // Activity at t=500 slides expiry, but only to the ceiling at t=1000.
        let validated = f.manager.validate(&issued.session_token, at(500)).await?;
        assert_eq!(validated.expires_at, at(1000));

        assert_eq!(
            f.manager
                .validate(&issued.session_token, at(1000))
                .await
                .expect_err("past ceiling"),
            AuthError::Expired
        );
        Ok(())
    }

    #[tokio::test]
    async fn an_idle_session_expires() -> anyhow::Result<()> {
        let config = AuthConfig::new().with_idle_ttl_seconds(60);
        let f = fixture(config).await?;
        let issued = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;
        assert_eq!(
            f.manager
                .validate(&issued.session_token, at(61))
                .await
                .expect_err("idle"),
            AuthError::Expired
        );
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_and_is_idempotent() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let issued = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;

        f.manager.revoke(&issued.session_token, at(1)).await?;
        f.manager.revoke(&issued.session_token, at(2)).await?;
        f.manager.revoke("never-issued", at(3)).await?;

        assert_eq!(
            f.manager
                .validate(&issued.session_token, at(4))
                .await
                .expect_err("revoked"),
            AuthError::Revoked
        );
        Ok(())
    }

    #[tokio::test]
    async fn deactivation_kills_the_session_on_next_contact() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let issued = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;

        f.directory.deactivate(f.identity_id).await;
        assert_eq!(
            f.manager
                .validate(&issued.session_token, at(1))
                .await
                .expect_err("deactivated"),
            AuthError::Revoked
        );
        let entries = f.audit.entries();
        assert!(entries
            .iter()
            .any(|e| e.kind == AuditEventKind::SessionRevoked
                && e.outcome == "identity_deactivated"));
        Ok(())
    }

    #[tokio::test]
    async fn reset_pin_revokes_every_session() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let one = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;
        let two = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-2", None, at(0))
            .await?;

        f.manager
            .reset_pin(f.identity_id, &pin("9876"), at(1))
            .await?;

        for token in [&one.session_token, &two.session_token] {
            assert_eq!(
                f.manager.validate(token, at(2)).await.expect_err("reset"),
                AuthError::Revoked
            );
        }
        // Old PIN is gone, new one works.
        assert_eq!(
            f.manager
                .login(f.identity_id, &pin("4321"), "tablet-1", None, at(3))
                .await
                .expect_err("old pin"),
            AuthError::InvalidCredentials
        );
        assert!(f
            .manager
            .login(f.identity_id, &pin("9876"), "tablet-1", None, at(4))
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn rate_limiter_throttles_before_verification() -> anyhow::Result<()> {
        let config = AuthConfig::new().with_device_attempts(2);
        let f = fixture(config).await?;
        for step in 0..2 {
            let _ = f
                .manager
                .login(f.identity_id, &pin("4321"), "tablet-1", None, at(step))
                .await;
        }
        let err = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(2))
            .await
            .expect_err("throttled");
        assert!(matches!(err, AuthError::RateLimited { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_identity_reads_as_invalid_credentials() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let ghost = Uuid::new_v4();
        assert_eq!(
            f.manager
                .login(ghost, &pin("4321"), "tablet-1", None, at(0))
                .await
                .expect_err("unknown"),
            AuthError::InvalidCredentials
        );
        // Audited without an identity id.
        let entries = f.audit.entries();
        assert!(entries
            .iter()
            .any(|e| e.kind == AuditEventKind::LoginFailure
                && e.identity_id.is_none()
                && e.outcome == "unknown_identity"));
        Ok(())
    }

    #[tokio::test]
    async fn lockout_is_audited_once_at_the_threshold() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        for step in 0..3 {
            let _ = f
                .manager
                .login(f.identity_id, &pin("0000"), "tablet-1", None, at(step))
                .await;
        }
        let lockouts = f
            .audit
            .entries()
            .iter()
            .filter(|e| e.kind == AuditEventKind::Lockout)
            .count();
        assert_eq!(lockouts, 1);
        Ok(())
    }

    #[tokio::test]
    async fn csrf_replay_is_rejected_and_audited() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        let issued = f
            .manager
            .login(f.identity_id, &pin("4321"), "tablet-1", None, at(0))
            .await?;

        let (_, next) = f
            .manager
            .authorize(&issued.session_token, &issued.csrf_token, at(1))
            .await?;
        assert_eq!(
            f.manager
                .authorize(&issued.session_token, &issued.csrf_token, at(2))
                .await
                .expect_err("replay"),
            AuthError::CsrfMismatch
        );
        // The rotated token is still good.
        assert!(f
            .manager
            .authorize(&issued.session_token, &next, at(3))
            .await
            .is_ok());
        assert!(f
            .audit
            .entries()
            .iter()
            .any(|e| e.kind == AuditEventKind::CsrfRejected));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() -> anyhow::Result<()> {
        let f = fixture(AuthConfig::new()).await?;
        assert_eq!(
            f.manager
                .validate("never-issued", at(0))
                .await
                .expect_err("unknown token"),
            AuthError::NotFound
        );
        Ok(())
    }
}
