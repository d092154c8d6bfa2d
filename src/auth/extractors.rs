use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::error::CredentialError;

const CONSUMER_CUSTOM_ID: &str = "x-consumer-custom-id";
const CONSUMER_USERNAME: &str = "x-consumer-username";

/// Consumer the gateway authenticated before proxying the request.
///
/// Token verification happens at the gateway; this only reads the identity it
/// forwards upstream.
#[derive(Debug, Clone)]
pub struct GatewayPrincipal {
    pub consumer: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for GatewayPrincipal
where
    S: Send + Sync,
{
    type Rejection = CredentialError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let consumer = [CONSUMER_CUSTOM_ID, CONSUMER_USERNAME]
            .iter()
            .find_map(|name| {
                parts
                    .headers
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            })
            .ok_or_else(|| {
                warn!("request reached profile without a gateway consumer");
                CredentialError::Unauthorized
            })?;

        Ok(GatewayPrincipal {
            consumer: consumer.to_string(),
        })
    }
}
