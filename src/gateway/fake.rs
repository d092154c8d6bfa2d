use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    consumer_name,
    types::{ExternalCredential, IssuedToken, OAuth2Credential, OAuth2Token},
    Provisioner, ProvisionerError,
};
use crate::{config::GatewayMode, users::Account};

/// OAuth2-flavoured gateway stand-in. Credentials are keyed by account id, so
/// provisioning twice returns the same pair, like the real gateway.
#[derive(Default)]
pub struct FakeProvisioner {
    credentials: Mutex<HashMap<Uuid, ExternalCredential>>,
    live_refresh: Mutex<HashSet<String>>,
    issued: AtomicUsize,
    provision_calls: AtomicUsize,
    failing_provisions: AtomicUsize,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` provision calls fail as if the gateway were down.
    pub fn fail_next_provisions(&self, n: usize) {
        self.failing_provisions.store(n, Ordering::SeqCst);
    }

    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    fn mint(&self) -> IssuedToken {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh_token = format!("refresh-{n}");
        self.live_refresh.lock().unwrap().insert(refresh_token.clone());
        IssuedToken::OAuth2(OAuth2Token {
            access_token: format!("access-{n}"),
            refresh_token,
            token_type: "bearer".into(),
            expires_in: 7200,
        })
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    fn mode(&self) -> GatewayMode {
        GatewayMode::OAuth2
    }

    async fn provision(&self, account: &Account) -> Result<ExternalCredential, ProvisionerError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_provisions.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_provisions.store(failing - 1, Ordering::SeqCst);
            return Err(ProvisionerError::Unavailable("gateway down".into()));
        }

        let mut credentials = self.credentials.lock().unwrap();
        let name = consumer_name(&account.id);
        let credential = credentials
            .entry(account.id)
            .or_insert_with(|| {
                ExternalCredential::OAuth2(OAuth2Credential {
                    id: format!("cred-{name}"),
                    name: "auth-service".into(),
                    client_id: format!("client-{name}"),
                    client_secret: format!("secret-{name}"),
                    redirect_uris: vec!["http://127.0.0.1/callback".into()],
                })
            })
            .clone();
        Ok(credential)
    }

    async fn issue_token(
        &self,
        _account: &Account,
        credential: &ExternalCredential,
    ) -> Result<IssuedToken, ProvisionerError> {
        if credential.mode() != GatewayMode::OAuth2 {
            return Err(ProvisionerError::CredentialMismatch(GatewayMode::OAuth2));
        }
        Ok(self.mint())
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        _credential: &ExternalCredential,
        refresh_token: &str,
    ) -> Result<IssuedToken, ProvisionerError> {
        if !self.live_refresh.lock().unwrap().remove(refresh_token) {
            return Err(ProvisionerError::Rejected("Invalid refresh_token".into()));
        }
        Ok(self.mint())
    }
}
