//! Authentication-related models

use super::account::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub secret: String,
}

/// Body returned by login and refresh; the refresh token travels in a cookie
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub role: Role,
    pub expires_in: u64,
}

/// Current identity
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Logout from all devices
#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}
