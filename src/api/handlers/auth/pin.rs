//! Self-service PIN change.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

use super::{
    auth_error_response,
    guard::authorize,
    session::clear_session_cookie,
    state::AuthState,
    types::ChangePinRequest,
};
use crate::api::handlers::valid_pin;

#[utoipa::path(
    post,
    path = "/v1/auth/pin",
    request_body = ChangePinRequest,
    responses(
        (status = 204, description = "PIN replaced; all sessions revoked"),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "No valid session", body = super::types::AuthFailure),
        (status = 403, description = "CSRF token mismatch", body = super::types::AuthFailure),
        (status = 503, description = "Storage unavailable", body = super::types::AuthFailure)
    ),
    tag = "auth"
)]
pub async fn change_pin(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<ChangePinRequest>>,
) -> Response {
    // Reject malformed requests before touching the CSRF state: authorizing
    // consumes the caller's token, and a 400 carries no replacement, which
    // would strand the session's token chain until re-login.
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };
    if !valid_pin(&request.new_pin) {
        return (StatusCode::BAD_REQUEST, "Invalid pin format").into_response();
    }

    let now = Utc::now();
    let (principal, _rotated) = match authorize(&headers, &state, now).await {
        Ok(authorized) => authorized,
        Err(response) => return response,
    };

    let new_pin = SecretString::from(request.new_pin);
    if let Err(err) = state
        .manager()
        .reset_pin(principal.identity.id, &new_pin, now)
        .await
    {
        return auth_error_response(&err);
    }

    info!(identity_id = %principal.identity.id, "pin changed, sessions revoked");

    // The caller's own session died with the reset; clear the cookie so the
    // tablet drops straight back to the login screen.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(state.config().secure_cookies()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}
