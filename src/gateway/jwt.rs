use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, instrument};

use super::{
    consumer_name,
    kong::KongAdmin,
    types::{ExternalCredential, IssuedToken, JwtCredential, JwtToken},
    Provisioner, ProvisionerError,
};
use crate::{
    config::{GatewayMode, JwtConfig},
    users::Account,
};

const PLUGIN: &str = "jwt";

/// Payload of tokens the gateway's jwt plugin verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,  // credential key, the gateway looks the secret up by it
    pub sub: String,  // consumer name
    pub role: String,
    pub iat: usize,
    pub exp: usize,
}

/// Provisions JWT key/secret pairs on the gateway and signs tokens locally with them.
pub struct JwtSigner {
    admin: KongAdmin,
    ttl: TimeDuration,
    role: String,
}

impl JwtSigner {
    pub fn new(admin: KongAdmin, config: &JwtConfig) -> Self {
        Self {
            admin,
            ttl: TimeDuration::minutes(config.ttl_minutes),
            role: config.role.clone(),
        }
    }

    fn sign(&self, account: &Account, credential: &JwtCredential) -> Result<JwtToken, ProvisionerError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            iss: credential.key.clone(),
            sub: consumer_name(&account.id),
            role: self.role.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(credential.secret.as_bytes()),
        )
        .map_err(|e| ProvisionerError::Unavailable(format!("jwt signing failed: {e}")))?;
        debug!(user_id = %account.id, "jwt signed");

        Ok(JwtToken {
            access_token: token,
            token_type: "bearer".into(),
            expires_in: self.ttl.whole_seconds(),
        })
    }
}

#[async_trait]
impl Provisioner for JwtSigner {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Jwt
    }

    #[instrument(skip(self, account), fields(user_id = %account.id))]
    async fn provision(&self, account: &Account) -> Result<ExternalCredential, ProvisionerError> {
        let name = consumer_name(&account.id);
        let consumer = self.admin.ensure_consumer(&name, &account.email).await?;

        let existing: Vec<JwtCredential> =
            self.admin.list_credentials(&consumer.id, PLUGIN).await?;
        if let Some(found) = existing.into_iter().next() {
            info!(credential_id = %found.id, "reusing existing jwt credential");
            return Ok(ExternalCredential::Jwt(found));
        }

        let created: JwtCredential = self
            .admin
            .create_credential(&consumer.id, PLUGIN, &json!({ "algorithm": "HS256" }))
            .await?;
        info!(credential_id = %created.id, "jwt credential created");
        Ok(ExternalCredential::Jwt(created))
    }

    async fn issue_token(
        &self,
        account: &Account,
        credential: &ExternalCredential,
    ) -> Result<IssuedToken, ProvisionerError> {
        match credential {
            ExternalCredential::Jwt(c) => Ok(IssuedToken::Jwt(self.sign(account, c)?)),
            _ => Err(ProvisionerError::CredentialMismatch(GatewayMode::Jwt)),
        }
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        _credential: &ExternalCredential,
        _refresh_token: &str,
    ) -> Result<IssuedToken, ProvisionerError> {
        Err(ProvisionerError::Rejected(
            "refresh tokens are not issued in jwt mode".into(),
        ))
    }
}
