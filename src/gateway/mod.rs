//! Credential provisioning against the external API gateway.
//!
//! One [`Provisioner`] contract, two implementations: [`OAuth2Broker`] hands
//! out gateway-managed OAuth2 client pairs and tokens, [`JwtSigner`] hands out
//! JWT key/secret pairs and signs tokens locally. Both share [`KongAdmin`] for
//! consumer and credential management.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    config::{AppConfig, GatewayMode},
    users::Account,
};

#[cfg(test)]
pub mod fake;
mod jwt;
mod kong;
mod oauth2;
pub mod types;

pub use jwt::JwtSigner;
pub use kong::KongAdmin;
pub use oauth2::OAuth2Broker;
pub use types::{ExternalCredential, IssuedToken};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionerError {
    /// Transport failure, timeout, 5xx or an unreadable response.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// The gateway answered and refused (4xx).
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("stored credential does not belong to {0} mode")]
    CredentialMismatch(GatewayMode),
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    fn mode(&self) -> GatewayMode;

    /// Creates (or finds) the consumer and its credential set. Safe to repeat for the same account.
    async fn provision(&self, account: &Account) -> Result<ExternalCredential, ProvisionerError>;

    async fn issue_token(
        &self,
        account: &Account,
        credential: &ExternalCredential,
    ) -> Result<IssuedToken, ProvisionerError>;

    async fn refresh_token(
        &self,
        account: &Account,
        credential: &ExternalCredential,
        refresh_token: &str,
    ) -> Result<IssuedToken, ProvisionerError>;
}

/// Gateway identifiers only allow alphanumerics, so separators are dropped from the id.
pub fn consumer_name(id: &Uuid) -> String {
    id.to_string()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Builds the provisioner for the configured mode.
pub fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn Provisioner>> {
    let gateway = &config.gateway;
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(gateway.timeout())
        .danger_accept_invalid_certs(gateway.accept_invalid_certs)
        .build()?;
    let admin = KongAdmin::new(http.clone(), &gateway.admin_url);

    let provisioner: Arc<dyn Provisioner> = match gateway.mode {
        GatewayMode::OAuth2 => Arc::new(OAuth2Broker::new(admin, http, gateway)),
        GatewayMode::Jwt => Arc::new(JwtSigner::new(admin, &config.jwt)),
    };
    Ok(provisioner)
}
