//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Role;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub identity_id: Uuid,
    pub pin: String,
    pub device_fingerprint: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub session_token: String,
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
    pub display_name: String,
    pub role: Role,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub identity_id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub device_fingerprint: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePinRequest {
    pub new_pin: String,
}

/// Error body shared by every auth endpoint. `retry_after_seconds` is only
/// present on throttled and locked responses.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthFailure {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn login_request_round_trips() -> Result<()> {
        let request = LoginRequest {
            identity_id: Uuid::new_v4(),
            pin: "1234".to_string(),
            device_fingerprint: "tablet-front-01".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let pin = value
            .get("pin")
            .and_then(serde_json::Value::as_str)
            .context("missing pin")?;
        assert_eq!(pin, "1234");
        let decoded: LoginRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.identity_id, request.identity_id);
        Ok(())
    }

    #[test]
    fn auth_failure_omits_absent_retry_hint() -> Result<()> {
        let failure = AuthFailure {
            error: "invalid_credentials".to_string(),
            retry_after_seconds: None,
        };
        let value = serde_json::to_value(&failure)?;
        assert!(value.get("retry_after_seconds").is_none());
        Ok(())
    }
}
