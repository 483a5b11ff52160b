//! PIN login endpoint.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::debug;

use super::{
    auth_error_response,
    session::session_cookie,
    state::AuthState,
    types::{LoginRequest, LoginResponse},
};
use crate::api::handlers::{extract_client_ip, valid_device_fingerprint, valid_pin};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Invalid credentials", body = super::types::AuthFailure),
        (status = 429, description = "Throttled or locked out", body = super::types::AuthFailure),
        (status = 503, description = "Storage unavailable", body = super::types::AuthFailure)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };
    if !valid_pin(&request.pin) {
        return (StatusCode::BAD_REQUEST, "Invalid pin format").into_response();
    }
    if !valid_device_fingerprint(&request.device_fingerprint) {
        return (StatusCode::BAD_REQUEST, "Invalid device fingerprint").into_response();
    }

    let pin = SecretString::from(request.pin);
    let source_addr = extract_client_ip(&headers);
    let issued = match state
        .manager()
        .login(
            request.identity_id,
            &pin,
            &request.device_fingerprint,
            source_addr.as_deref(),
            Utc::now(),
        )
        .await
    {
        Ok(issued) => issued,
        Err(err) => return auth_error_response(&err),
    };

    debug!(identity_id = %issued.identity.id, "session issued");

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(
        &issued.session_token,
        state.config().idle_ttl_seconds(),
        state.config().secure_cookies(),
    ) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    let body = LoginResponse {
        session_token: issued.session_token,
        csrf_token: issued.csrf_token,
        expires_at: issued.expires_at,
        display_name: issued.identity.display_name,
        role: issued.identity.role,
    };
    (StatusCode::OK, response_headers, Json(body)).into_response()
}
