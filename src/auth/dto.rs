use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::GatewayMode, gateway::IssuedToken};

/// Request body for registration and login.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: String,
}

/// Uniform wrapper for every JSON response: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

/// Returned by register, login and refresh.
#[derive(Debug, Clone, Serialize)]
pub struct Issued {
    pub account_id: Uuid,
    pub credentials: IssuedToken,
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub status: &'static str,
    pub consumer: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub description: &'static str,
    pub version: &'static str,
    pub gateway_mode: GatewayMode,
}
