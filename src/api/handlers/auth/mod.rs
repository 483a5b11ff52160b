//! Auth endpoints: login, session introspection, logout, PIN change.

pub mod guard;
pub mod login;
pub mod pin;
pub mod session;
pub mod state;
pub mod types;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use crate::auth::AuthError;
use types::AuthFailure;

/// Map a core auth error onto the wire. Throttled and locked responses share
/// a 429 with a `Retry-After` header; every credential problem is the same
/// 401 so the response never reveals whether an identity exists.
pub(crate) fn auth_error_response(err: &AuthError) -> Response {
    let (status, code, retry_after) = match err {
        AuthError::RateLimited {
            retry_after_seconds,
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            Some(*retry_after_seconds),
        ),
        AuthError::Locked {
            retry_after_seconds,
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            "locked",
            Some(*retry_after_seconds),
        ),
        AuthError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, "invalid_credentials", None)
        }
        AuthError::Expired => (StatusCode::UNAUTHORIZED, "session_expired", None),
        AuthError::Revoked => (StatusCode::UNAUTHORIZED, "session_revoked", None),
        AuthError::NotFound => (StatusCode::UNAUTHORIZED, "invalid_session", None),
        AuthError::CsrfMismatch => (StatusCode::FORBIDDEN, "csrf_mismatch", None),
        AuthError::StoreUnavailable => {
            error!("Auth storage unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable", None)
        }
    };

    let body = Json(AuthFailure {
        error: code.to_string(),
        retry_after_seconds: retry_after,
    });
    let mut response = (status, body).into_response();
    if let Some(seconds) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
    }
    response
}
