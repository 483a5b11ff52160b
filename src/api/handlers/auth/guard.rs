//! Authorization gate for state-changing endpoints.
//!
//! A request passes when it carries a live session token and the session's
//! current CSRF token. Passing consumes the CSRF token; the replacement
//! travels back on the response so the client can chain mutations.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

use super::{auth_error_response, session::extract_session_token, state::AuthState};
use crate::auth::{AuthError, Identity};

pub(crate) const CSRF_HEADER: &str = "x-csrf-token";

/// The authenticated caller of a state-changing request.
pub struct Principal {
    pub identity: Identity,
    pub device_id: String,
    pub session_token: String,
}

/// Validate session and CSRF token; on success the returned headers carry
/// the rotated CSRF token for the client.
///
/// # Errors
/// Returns the ready-to-send error response on any failure.
pub(crate) async fn authorize(
    headers: &HeaderMap,
    state: &AuthState,
    now: DateTime<Utc>,
) -> Result<(Principal, HeaderMap), Response> {
    let Some(session_token) = extract_session_token(headers) else {
        return Err(auth_error_response(&AuthError::NotFound));
    };
    let Some(csrf_token) = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Err(auth_error_response(&AuthError::CsrfMismatch));
    };

    let (validated, next_csrf) = state
        .manager()
        .authorize(&session_token, csrf_token, now)
        .await
        .map_err(|err| auth_error_response(&err))?;

    let mut response_headers = HeaderMap::new();
    match HeaderValue::from_str(&next_csrf) {
        Ok(value) => {
            response_headers.insert(CSRF_HEADER, value);
        }
        Err(_) => {
            // Tokens are base64url so this cannot happen; fail closed anyway.
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    }

    Ok((
        Principal {
            identity: validated.identity,
            device_id: validated.device_id,
            session_token,
        },
        response_headers,
    ))
}
