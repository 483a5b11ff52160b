use axum::{http::StatusCode, response::IntoResponse};

/// Undocumented root route; probes hitting `/` get an empty 200.
pub async fn root() -> impl IntoResponse {
    StatusCode::OK
}
