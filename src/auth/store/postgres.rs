//! Postgres-backed storage for state that must survive restarts.
//!
//! Attempt records are updated inside a transaction with a row lock, which
//! serializes the failure transition per (identity, device) across service
//! instances. CSRF rotation is a conditional UPDATE, so the one-time-use
//! guarantee holds without any application-side locking. Every fault maps to
//! `StoreError::Unavailable`; callers own the retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

use super::{AttemptStore, SessionRecord, SessionStore, StoreError};
use crate::auth::attempts::{advance, AttemptRecord, LockoutPolicy};
use crate::auth::audit::{AuditEntry, AuditSink};
use crate::auth::identity::{Directory, Identity, Role};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        error!("{what}: {err}");
        StoreError::Unavailable
    }
}

fn attempt_record_from_row(row: &sqlx::postgres::PgRow) -> AttemptRecord {
    let failures: i32 = row.get("failures");
    let lockouts: i32 = row.get("lockouts");
    AttemptRecord {
        failures: u32::try_from(failures).unwrap_or(0),
        lockouts: u32::try_from(lockouts).unwrap_or(0),
        last_failure_at: row.get("last_failure_at"),
        locked_until: row.get("locked_until"),
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn record_failure(
        &self,
        identity_id: Uuid,
        device_id: &str,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<AttemptRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(unavailable("Failed to begin attempt transaction"))?;

        // Row lock serializes the transition per pair across instances.
        let query = r"
            SELECT failures, lockouts, last_failure_at, locked_until
            FROM auth_attempts
            WHERE identity_id = $1 AND device_id = $2
            FOR UPDATE
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity_id)
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to lock attempt record"))?;

        let current = row.as_ref().map(attempt_record_from_row);
        let next = advance(current.as_ref(), now, policy);

        let query = r"
            INSERT INTO auth_attempts
                (identity_id, device_id, failures, lockouts, last_failure_at, locked_until)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (identity_id, device_id) DO UPDATE SET
                failures = EXCLUDED.failures,
                lockouts = EXCLUDED.lockouts,
                last_failure_at = EXCLUDED.last_failure_at,
                locked_until = EXCLUDED.locked_until
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(identity_id)
            .bind(device_id)
            .bind(i32::try_from(next.failures).unwrap_or(i32::MAX))
            .bind(i32::try_from(next.lockouts).unwrap_or(i32::MAX))
            .bind(next.last_failure_at)
            .bind(next.locked_until)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to upsert attempt record"))?;

        tx.commit()
            .await
            .map_err(unavailable("Failed to commit attempt transaction"))?;

        Ok(next)
    }

    async fn fetch_attempts(
        &self,
        identity_id: Uuid,
        device_id: &str,
    ) -> Result<Option<AttemptRecord>, StoreError> {
        let query = r"
            SELECT failures, lockouts, last_failure_at, locked_until
            FROM auth_attempts
            WHERE identity_id = $1 AND device_id = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to fetch attempt record"))?;
        Ok(row.as_ref().map(attempt_record_from_row))
    }

    async fn clear_attempts(&self, identity_id: Uuid, device_id: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM auth_attempts WHERE identity_id = $1 AND device_id = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(identity_id)
            .bind(device_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to clear attempt record"))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn replace_pair(&self, record: SessionRecord) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(unavailable("Failed to begin session transaction"))?;

        let query = r"
            UPDATE sessions SET revoked = TRUE
            WHERE identity_id = $1 AND device_id = $2 AND NOT revoked
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let superseded = sqlx::query(query)
            .bind(record.identity_id)
            .bind(&record.device_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to supersede sessions"))?
            .rows_affected();

        let query = r"
            INSERT INTO sessions
                (token_hash, identity_id, device_id, issued_at, expires_at,
                 last_activity_at, revoked, csrf_hash)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&record.token_hash)
            .bind(record.identity_id)
            .bind(&record.device_id)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .bind(record.last_activity_at)
            .bind(&record.csrf_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to insert session"))?;

        tx.commit()
            .await
            .map_err(unavailable("Failed to commit session transaction"))?;

        Ok(superseded)
    }

    async fn fetch(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>, StoreError> {
        let query = r"
            SELECT token_hash, identity_id, device_id, issued_at, expires_at,
                   last_activity_at, revoked, csrf_hash
            FROM sessions
            WHERE token_hash = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to fetch session"))?;

        Ok(row.map(|row| SessionRecord {
            token_hash: row.get("token_hash"),
            identity_id: row.get("identity_id"),
            device_id: row.get("device_id"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            last_activity_at: row.get("last_activity_at"),
            revoked: row.get("revoked"),
            csrf_hash: row.get("csrf_hash"),
        }))
    }

    async fn touch(
        &self,
        token_hash: &[u8],
        last_activity_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE sessions
            SET last_activity_at = $2, expires_at = $3
            WHERE token_hash = $1 AND NOT revoked
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .bind(last_activity_at)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to touch session"))?;
        Ok(())
    }

    async fn revoke(&self, token_hash: &[u8]) -> Result<bool, StoreError> {
        let query = "UPDATE sessions SET revoked = TRUE WHERE token_hash = $1 AND NOT revoked";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to revoke session"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_identity(&self, identity_id: Uuid) -> Result<u64, StoreError> {
        let query = "UPDATE sessions SET revoked = TRUE WHERE identity_id = $1 AND NOT revoked";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(identity_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to revoke identity sessions"))?;
        Ok(result.rows_affected())
    }

    async fn rotate_csrf(
        &self,
        token_hash: &[u8],
        expected: &[u8],
        next: &[u8],
    ) -> Result<bool, StoreError> {
        // Conditional UPDATE is the compare-and-swap: a replayed token
        // matches zero rows.
        let query = r"
            UPDATE sessions SET csrf_hash = $3
            WHERE token_hash = $1 AND csrf_hash = $2 AND NOT revoked
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(expected)
            .bind(next)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to rotate csrf token"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM sessions WHERE revoked OR expires_at <= $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to sweep sessions"))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = "SELECT display_name, role, active FROM identities WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to fetch identity"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.get("role");
        let Some(role) = Role::parse(&role) else {
            error!("Unknown role {role:?} for identity {id}");
            return Err(StoreError::Unavailable);
        };
        Ok(Some(Identity {
            id,
            display_name: row.get("display_name"),
            role,
            active: row.get("active"),
        }))
    }

    async fn credential_hash(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let query = "SELECT pin_hash FROM identities WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to fetch credential hash"))?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>("pin_hash")))
    }

    async fn set_credential_hash(&self, id: Uuid, phc: &str) -> Result<(), StoreError> {
        let query = "UPDATE identities SET pin_hash = $2, updated_at = NOW() WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(phc)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(unavailable("Failed to set credential hash"))?;
        Ok(())
    }
}

/// Durable audit sink. Writes are fire-and-forget so a storage fault can
/// never fail the authentication path; the structured log line is the
/// best-effort secondary channel.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn append(&self, entry: AuditEntry) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(err) = insert_audit(&pool, &entry).await {
                warn!("Failed to persist audit entry: {err}");
            }
        });
    }
}

async fn insert_audit(pool: &PgPool, entry: &AuditEntry) -> Result<()> {
    let query = r"
        INSERT INTO audit_log (at, kind, identity_id, device_id, outcome)
        VALUES ($1, $2, $3, $4, $5)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(entry.at)
        .bind(entry.kind.as_str())
        .bind(entry.identity_id)
        .bind(&entry.device_id)
        .bind(&entry.outcome)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert audit entry")?;
    Ok(())
}
