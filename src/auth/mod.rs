//! Device-bound PIN authentication core.
//!
//! Staff authenticate on shared tablets with short numeric PINs; everything
//! here exists to make that workable: salted PIN hashing, per-(identity,
//! device) lockout with geometric backoff, identity-independent rate limits,
//! opaque sessions with sliding and absolute expiry, one-time CSRF tokens,
//! and an append-only audit trail. The HTTP layer under `crate::api` is a
//! thin shell over [`SessionManager`].

pub mod attempts;
pub mod audit;
pub mod config;
pub mod credentials;
pub mod csrf;
pub mod error;
pub mod identity;
pub mod rate_limit;
pub mod session;
pub mod store;
pub(crate) mod tokens;

pub use config::AuthConfig;
pub use error::AuthError;
pub use identity::{Identity, Role};
pub use session::{IssuedSession, SessionManager, ValidatedSession};
