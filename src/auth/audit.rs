//! Append-only trail of authentication events.
//!
//! Audit writes never fail the caller: the sink either records the entry or
//! drops it with a log line. Entries carry identifiers and outcomes only,
//! never PINs or tokens. `identity_id` is `None` when the presented identity
//! does not exist, so the trail itself cannot be used to probe the directory.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditEventKind {
    LoginSuccess,
    LoginFailure,
    Lockout,
    SessionRevoked,
    CsrfRejected,
}

impl AuditEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::Lockout => "lockout",
            Self::SessionRevoked => "session_revoked",
            Self::CsrfRejected => "csrf_rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub identity_id: Option<Uuid>,
    pub device_id: String,
    pub outcome: String,
}

/// Infallible from the caller's point of view. Implementations own their
/// failure handling.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: AuditEntry);
}

/// Default sink: structured log lines under the `audit` target.
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            kind = entry.kind.as_str(),
            identity_id = ?entry.identity_id,
            device_id = %entry.device_id,
            outcome = %entry.outcome,
            at = %entry.at.to_rfc3339(),
            "audit event"
        );
    }
}

/// Test sink that keeps entries in order for assertions.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}
