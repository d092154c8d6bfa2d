use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{
    consumer_name,
    kong::{read_json, KongAdmin},
    types::{ExternalCredential, IssuedToken, OAuth2Credential, OAuth2Token},
    Provisioner, ProvisionerError,
};
use crate::{
    config::{GatewayConfig, GatewayMode},
    users::Account,
};

const PLUGIN: &str = "oauth2";

/// Brokers OAuth2 client pairs and password-grant tokens through the gateway.
pub struct OAuth2Broker {
    admin: KongAdmin,
    http: reqwest::Client,
    token_url: String,
    provision_key: String,
    app_name: String,
    redirect_uri: String,
}

impl OAuth2Broker {
    pub fn new(admin: KongAdmin, http: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            admin,
            http,
            token_url: format!("{}/oauth2/token", config.proxy_url.trim_end_matches('/')),
            provision_key: config.provision_key.clone(),
            app_name: config.app_name.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
        what: &str,
    ) -> Result<IssuedToken, ProvisionerError> {
        let res = self.http.post(&self.token_url).form(form).send().await;
        let token: OAuth2Token = read_json(res, what).await?;
        debug!(token_type = %token.token_type, expires_in = token.expires_in, "oauth2 token issued");
        Ok(IssuedToken::OAuth2(token))
    }
}

fn client_pair(credential: &ExternalCredential) -> Result<&OAuth2Credential, ProvisionerError> {
    match credential {
        ExternalCredential::OAuth2(c) => Ok(c),
        _ => Err(ProvisionerError::CredentialMismatch(GatewayMode::OAuth2)),
    }
}

#[async_trait]
impl Provisioner for OAuth2Broker {
    fn mode(&self) -> GatewayMode {
        GatewayMode::OAuth2
    }

    #[instrument(skip(self, account), fields(user_id = %account.id))]
    async fn provision(&self, account: &Account) -> Result<ExternalCredential, ProvisionerError> {
        let name = consumer_name(&account.id);
        let consumer = self.admin.ensure_consumer(&name, &account.email).await?;

        let existing: Vec<OAuth2Credential> =
            self.admin.list_credentials(&consumer.id, PLUGIN).await?;
        if let Some(found) = existing.into_iter().find(|c| c.name == self.app_name) {
            info!(credential_id = %found.id, "reusing existing oauth2 client");
            return Ok(ExternalCredential::OAuth2(found));
        }

        let body = json!({
            "name": self.app_name,
            "redirect_uris": [self.redirect_uri],
        });
        let created: OAuth2Credential = self
            .admin
            .create_credential(&consumer.id, PLUGIN, &body)
            .await?;
        info!(credential_id = %created.id, "oauth2 client created");
        Ok(ExternalCredential::OAuth2(created))
    }

    #[instrument(skip(self, account, credential), fields(user_id = %account.id))]
    async fn issue_token(
        &self,
        account: &Account,
        credential: &ExternalCredential,
    ) -> Result<IssuedToken, ProvisionerError> {
        let pair = client_pair(credential)?;
        let user_id = account.id.to_string();
        self.token_request(
            &[
                ("grant_type", "password"),
                ("provision_key", self.provision_key.as_str()),
                ("authenticated_userid", user_id.as_str()),
                ("client_id", pair.client_id.as_str()),
                ("client_secret", pair.client_secret.as_str()),
            ],
            "password grant",
        )
        .await
    }

    #[instrument(skip_all, fields(user_id = %account.id))]
    async fn refresh_token(
        &self,
        account: &Account,
        credential: &ExternalCredential,
        refresh_token: &str,
    ) -> Result<IssuedToken, ProvisionerError> {
        let pair = client_pair(credential)?;
        self.token_request(
            &[
                ("grant_type", "refresh_token"),
                ("provision_key", self.provision_key.as_str()),
                ("refresh_token", refresh_token),
                ("client_id", pair.client_id.as_str()),
                ("client_secret", pair.client_secret.as_str()),
            ],
            "refresh grant",
        )
        .await
    }
}
