use serde::{Deserialize, Serialize};

use crate::config::GatewayMode;

/// Credential set the gateway holds for one consumer, persisted verbatim on the user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExternalCredential {
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Credential),
    Jwt(JwtCredential),
}

impl ExternalCredential {
    pub fn mode(&self) -> GatewayMode {
        match self {
            Self::OAuth2(_) => GatewayMode::OAuth2,
            Self::Jwt(_) => GatewayMode::Jwt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Credential {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtCredential {
    pub id: String,
    pub key: String,
    pub secret: String,
    pub algorithm: String,
}

/// Token pair as returned by the gateway's `/oauth2/token` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// What a caller receives after register, login or refresh.
/// Serializes as `{"oauth2": {...}}` or `{"jwt": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuedToken {
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Token),
    Jwt(JwtToken),
}

impl IssuedToken {
    pub fn access_token(&self) -> &str {
        match self {
            Self::OAuth2(t) => &t.access_token,
            Self::Jwt(t) => &t.access_token,
        }
    }

    /// Only the OAuth2 flavour carries a refresh token.
    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            Self::OAuth2(t) => Some(&t.refresh_token),
            Self::Jwt(_) => None,
        }
    }
}
