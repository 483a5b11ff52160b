//! # Shiftgate
//!
//! `shiftgate` is the authentication gate for shared restaurant tablets.
//! Staff identify themselves with a short numeric PIN bound to a device
//! fingerprint; the service answers with an opaque session token and a
//! one-time CSRF token, and every later request is checked against both.
//!
//! Design points:
//!
//! - **PINs are low entropy by nature.** The compensating controls are
//!   per-(staff, device) lockout with geometric backoff, identity-independent
//!   rate limits per device and per source address, and Argon2id hashing with
//!   a per-credential salt.
//! - **One session per (staff, device) pair.** A new login supersedes the
//!   pair's previous session, so a tablet can never carry two live sessions
//!   for the same person.
//! - **Sessions slide but never outlive their ceiling.** Activity extends the
//!   idle window; the absolute lifetime from issuance is a hard cap.
//! - **Storage is pluggable.** An in-memory store covers tests and single-node
//!   deployments; `PostgreSQL` holds sessions, attempt counters, and the audit
//!   log when lockouts must survive restarts (see `db/sql/01_shiftgate.sql`).

pub mod api;
pub mod auth;
pub mod cli;

#[cfg(test)]
mod tests {
    use anyhow::{ensure, Context, Result};
    use std::fs;
    use std::path::{Path, PathBuf};

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonicalize_sql(sql: &str) -> String {
        sql.chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect()
    }

    fn canonical_sql(path: &Path) -> Result<String> {
        let sql = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(canonicalize_sql(&sql))
    }

    fn assert_contains(path: &Path, canonical: &str, needle: &str) -> Result<()> {
        ensure!(
            canonical.contains(needle),
            "Expected {needle} is missing in {}",
            path.display()
        );
        Ok(())
    }

    // Smoke-test the SQL bootstrap file so the Rust row mappings in
    // `auth::store::postgres` stay aligned with the schema.
    #[test]
    fn schema_sql_integrity() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_shiftgate.sql");
        let canonical = canonical_sql(&path)?;

        assert_contains(&path, &canonical, "createtableifnotexistsidentities")?;
        assert_contains(&path, &canonical, "pin_hashtext")?;
        assert_contains(&path, &canonical, "createtableifnotexistsauth_attempts")?;
        assert_contains(&path, &canonical, "primarykey(identity_id,device_id)")?;
        assert_contains(&path, &canonical, "createtableifnotexistssessions")?;
        assert_contains(&path, &canonical, "token_hashbyteaprimarykey")?;
        assert_contains(&path, &canonical, "csrf_hashbyteanotnull")?;
        assert_contains(&path, &canonical, "createtableifnotexistsaudit_log")
    }

    #[test]
    fn schema_sql_keeps_audit_identity_nullable() -> Result<()> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("db/sql/01_shiftgate.sql");
        let canonical = canonical_sql(&path)?;
        // The audit table must not force identity_id NOT NULL: unknown-identity
        // attempts are recorded without one.
        ensure!(
            !canonical.contains("identity_iduuidnotnull,device_idtextnotnull,outcome"),
            "audit_log.identity_id must stay nullable in {}",
            path.display()
        );
        assert_contains(&path, &canonical, "identity_iduuid,")
    }
}
