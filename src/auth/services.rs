use std::{sync::Arc, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{Issued, Profile},
        extractors::GatewayPrincipal,
        password::{hash_password_blocking, verify_nothing, verify_password_blocking},
    },
    error::CredentialError,
    gateway::{ExternalCredential, Provisioner},
    users::{Account, StoreError, StoredUser, UserStore},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate(email: &str, password: &str) -> Result<(), CredentialError> {
    if !is_valid_email(email) {
        return Err(CredentialError::InvalidInput("invalid email".into()));
    }
    if password.is_empty() {
        return Err(CredentialError::InvalidInput("password is required".into()));
    }
    Ok(())
}

/// Drives register, authenticate and refresh across the user store and the gateway.
///
/// Steps run strictly in order and the first failure is returned as is. A
/// registration interrupted after the user row was written is resumed by the
/// next register or login with the same credentials: provisioning is keyed by
/// the user id, so repeating it never creates a second credential set.
///
/// A register call only works on a row while it holds that row's provisioning
/// claim. The claim lapses after `lease`, so a crashed registration does not
/// lock the email out for good.
pub struct CredentialWorkflow {
    store: Arc<dyn UserStore>,
    provisioner: Arc<dyn Provisioner>,
    lease: Duration,
}

impl CredentialWorkflow {
    pub fn new(
        store: Arc<dyn UserStore>,
        provisioner: Arc<dyn Provisioner>,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            provisioner,
            lease,
        }
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> Result<Issued, CredentialError> {
        let email = normalize_email(email);
        validate(&email, password)?;

        let hash = hash_password_blocking(password.to_string())
            .await
            .map_err(|e| CredentialError::Internal(e.to_string()))?;
        let account = match self.store.create_user(&email, &hash).await {
            Ok(id) => Account { id, email },
            Err(StoreError::DuplicateEmail) => self.resumable(&email, password).await?,
            Err(e) => return Err(e.into()),
        };

        let credential = match self.provision_claimed(&account).await {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id = %account.id, error = %e, "provisioning failed; registration can be retried");
                if let Err(release) = self.store.release_provisioning(account.id).await {
                    warn!(user_id = %account.id, error = %release, "could not release provisioning claim");
                }
                return Err(e);
            }
        };

        let issued = self.issue(&account, &credential).await?;
        info!(user_id = %account.id, "user registered");
        Ok(issued)
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Issued, CredentialError> {
        let email = normalize_email(email);
        validate(&email, password)?;

        let user = match self.store.find_by_email(&email).await {
            Ok(u) => u,
            Err(StoreError::NotFound) => {
                verify_nothing(password.to_string()).await;
                warn!("login for unknown email");
                return Err(CredentialError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };
        if !verify_password_blocking(password.to_string(), user.password_hash.clone()).await {
            warn!(user_id = %user.id, "login with wrong password");
            return Err(CredentialError::Unauthorized);
        }

        let account = user.account();
        let credential = self.ensure_provisioned(&account, user.credential).await?;
        let issued = self.issue(&account, &credential).await?;
        info!(user_id = %account.id, "user logged in");
        Ok(issued)
    }

    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Issued, CredentialError> {
        if refresh_token.is_empty() {
            return Err(CredentialError::InvalidInput("refresh_token is required".into()));
        }

        let (account, credential) = match self.store.find_by_refresh_token(refresh_token).await {
            Ok(found) => found,
            Err(StoreError::NotFound) => return Err(CredentialError::NotFound("token")),
            Err(e) => return Err(e.into()),
        };
        let credential = credential.ok_or_else(|| {
            CredentialError::CorruptState(format!(
                "user {} holds a refresh token but no gateway credential",
                account.id
            ))
        })?;

        let token = self
            .provisioner
            .refresh_token(&account, &credential, refresh_token)
            .await?;
        if let Some(next) = token.refresh_token() {
            self.store.set_refresh_token(account.id, next).await?;
        }
        info!(user_id = %account.id, "token refreshed");
        Ok(Issued {
            account_id: account.id,
            credentials: token,
        })
    }

    pub fn profile(&self, principal: &GatewayPrincipal) -> Profile {
        Profile {
            status: "authenticated",
            consumer: principal.consumer.clone(),
        }
    }

    /// An existing row may be picked up again only if it never got a credential,
    /// the caller proves the same password and nobody else is provisioning it.
    async fn resumable(&self, email: &str, password: &str) -> Result<Account, CredentialError> {
        let existing: StoredUser = self.store.find_by_email(email).await?;
        if existing.credential.is_some()
            || !verify_password_blocking(password.to_string(), existing.password_hash.clone()).await
        {
            return Err(CredentialError::DuplicateEmail);
        }
        if !self.store.claim_provisioning(existing.id, self.lease).await? {
            info!(user_id = %existing.id, "registration already in progress");
            return Err(CredentialError::DuplicateEmail);
        }
        info!(user_id = %existing.id, "resuming incomplete registration");
        Ok(existing.account())
    }

    async fn provision_claimed(
        &self,
        account: &Account,
    ) -> Result<ExternalCredential, CredentialError> {
        let credential = self.provisioner.provision(account).await?;
        match self
            .store
            .attach_external_credential(account.id, &credential)
            .await
        {
            Ok(()) => Ok(credential),
            // a login for the same account attached first
            Err(StoreError::CredentialConflict) => Err(CredentialError::DuplicateEmail),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_provisioned(
        &self,
        account: &Account,
        credential: Option<ExternalCredential>,
    ) -> Result<ExternalCredential, CredentialError> {
        if let Some(c) = credential {
            return Ok(c);
        }
        info!(user_id = %account.id, "completing interrupted provisioning");
        let credential = self.provisioner.provision(account).await?;
        match self
            .store
            .attach_external_credential(account.id, &credential)
            .await
        {
            Ok(()) => Ok(credential),
            Err(StoreError::CredentialConflict) => {
                // someone else attached first; use what they stored
                let current = self.store.find_by_email(&account.email).await?;
                current.credential.ok_or_else(|| {
                    CredentialError::CorruptState(format!(
                        "user {} reported a credential conflict but has none",
                        account.id
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn issue(
        &self,
        account: &Account,
        credential: &ExternalCredential,
    ) -> Result<Issued, CredentialError> {
        let token = self.provisioner.issue_token(account, credential).await?;
        if let Some(refresh) = token.refresh_token() {
            self.store.set_refresh_token(account.id, refresh).await?;
        }
        Ok(Issued {
            account_id: account.id,
            credentials: token,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::password::{hash_password, verify_password},
        gateway::{fake::FakeProvisioner, types::OAuth2Credential},
        users::memory::MemoryUserStore,
    };

    const LEASE: Duration = Duration::from_secs(60);

    struct Harness {
        store: Arc<MemoryUserStore>,
        gateway: Arc<FakeProvisioner>,
        workflow: CredentialWorkflow,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryUserStore::new());
        let gateway = Arc::new(FakeProvisioner::new());
        let workflow = CredentialWorkflow::new(store.clone(), gateway.clone(), LEASE);
        Harness {
            store,
            gateway,
            workflow,
        }
    }

    /// Memory store that yields before every call and can slip a rival
    /// credential in just ahead of the next attach.
    #[derive(Default)]
    struct InterleavingStore {
        inner: MemoryUserStore,
        rival: Mutex<Option<ExternalCredential>>,
    }

    #[async_trait]
    impl UserStore for InterleavingStore {
        async fn create_user(&self, email: &str, password_hash: &str) -> Result<Uuid, StoreError> {
            tokio::task::yield_now().await;
            self.inner.create_user(email, password_hash).await
        }

        async fn attach_external_credential(
            &self,
            id: Uuid,
            credential: &ExternalCredential,
        ) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            let rival = self.rival.lock().unwrap().take();
            if let Some(rival) = rival {
                self.inner.attach_external_credential(id, &rival).await?;
            }
            self.inner.attach_external_credential(id, credential).await
        }

        async fn claim_provisioning(&self, id: Uuid, lease: Duration) -> Result<bool, StoreError> {
            tokio::task::yield_now().await;
            self.inner.claim_provisioning(id, lease).await
        }

        async fn release_provisioning(&self, id: Uuid) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.release_provisioning(id).await
        }

        async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.set_refresh_token(id, token).await
        }

        async fn find_by_email(&self, email: &str) -> Result<StoredUser, StoreError> {
            tokio::task::yield_now().await;
            self.inner.find_by_email(email).await
        }

        async fn find_by_refresh_token(
            &self,
            token: &str,
        ) -> Result<(Account, Option<ExternalCredential>), StoreError> {
            tokio::task::yield_now().await;
            self.inner.find_by_refresh_token(token).await
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("al ice@example.com"));
    }

    #[tokio::test]
    async fn register_persists_hash_and_credential() {
        let h = harness();
        let issued = h.workflow.register(" Alice@Example.com ", "pw1").await.unwrap();

        let stored = h.store.user("alice@example.com").expect("row exists");
        assert_eq!(stored.id, issued.account_id);
        assert_ne!(stored.password_hash, "pw1");
        assert!(verify_password("pw1", &stored.password_hash));
        assert!(stored.credential.is_some());

        let refresh = issued.credentials.refresh_token().unwrap();
        let (owner, _) = h.store.find_by_refresh_token(refresh).await.unwrap();
        assert_eq!(owner.id, issued.account_id);
    }

    #[tokio::test]
    async fn register_rejects_bad_input_before_touching_the_store() {
        let h = harness();
        let err = h.workflow.register("not-an-email", "pw").await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidInput(_)));
        let err = h.workflow.register("a@example.com", "").await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidInput(_)));
        assert!(h.store.user("a@example.com").is_none());
        assert_eq!(h.gateway.provision_calls(), 0);
    }

    #[tokio::test]
    async fn second_registration_is_duplicate_whatever_the_password() {
        let h = harness();
        h.workflow.register("alice@example.com", "pw1").await.unwrap();
        let err = h.workflow.register("alice@example.com", "pw2").await.unwrap_err();
        assert!(matches!(err, CredentialError::DuplicateEmail));
        let err = h.workflow.register("alice@example.com", "pw1").await.unwrap_err();
        assert!(matches!(err, CredentialError::DuplicateEmail));
    }

    #[tokio::test]
    async fn failed_provisioning_can_be_retried_with_same_email() {
        let h = harness();
        h.gateway.fail_next_provisions(1);

        let err = h.workflow.register("carol@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, CredentialError::ProvisionerUnavailable(_)));
        let pending = h.store.user("carol@example.com").unwrap();
        assert!(pending.credential.is_none());

        // a different password does not get to take over the pending row
        let err = h.workflow.register("carol@example.com", "other").await.unwrap_err();
        assert!(matches!(err, CredentialError::DuplicateEmail));

        let issued = h.workflow.register("carol@example.com", "pw").await.unwrap();
        assert_eq!(issued.account_id, pending.id);
        assert!(h.store.user("carol@example.com").unwrap().credential.is_some());
    }

    #[tokio::test]
    async fn concurrent_same_email_registrations_have_one_winner() {
        let store = Arc::new(InterleavingStore::default());
        let gateway = Arc::new(FakeProvisioner::new());
        let workflow = CredentialWorkflow::new(store.clone(), gateway.clone(), LEASE);

        let (a, b) = tokio::join!(
            workflow.register("alice@example.com", "pw1"),
            workflow.register("alice@example.com", "pw1"),
        );
        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            (a, b) => panic!("expected exactly one winner, got {a:?} and {b:?}"),
        };
        assert!(matches!(loser, CredentialError::DuplicateEmail));
        assert_eq!(gateway.provision_calls(), 1);

        let stored = store.inner.user("alice@example.com").unwrap();
        assert_eq!(stored.id, winner.account_id);
    }

    #[tokio::test]
    async fn abandoned_registration_is_taken_over_once_its_claim_lapses() {
        let store = Arc::new(MemoryUserStore::new());
        let gateway = Arc::new(FakeProvisioner::new());
        // row left behind by a registration that never came back
        let id = store
            .create_user("frank@example.com", &hash_password("pw").unwrap())
            .await
            .unwrap();

        let fresh = CredentialWorkflow::new(store.clone(), gateway.clone(), LEASE);
        let err = fresh.register("frank@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, CredentialError::DuplicateEmail));

        let lapsed = CredentialWorkflow::new(store.clone(), gateway.clone(), Duration::ZERO);
        let issued = lapsed.register("frank@example.com", "pw").await.unwrap();
        assert_eq!(issued.account_id, id);
    }

    #[tokio::test]
    async fn login_adopts_credential_attached_by_a_concurrent_flow() {
        let store = Arc::new(InterleavingStore::default());
        let gateway = Arc::new(FakeProvisioner::new());
        let workflow = CredentialWorkflow::new(store.clone(), gateway.clone(), LEASE);
        store
            .inner
            .create_user("gina@example.com", &hash_password("pw").unwrap())
            .await
            .unwrap();

        let rival = ExternalCredential::OAuth2(OAuth2Credential {
            id: "rival".into(),
            name: "auth-service".into(),
            client_id: "rival-client".into(),
            client_secret: "rival-secret".into(),
            redirect_uris: vec![],
        });
        *store.rival.lock().unwrap() = Some(rival.clone());

        let issued = workflow.authenticate("gina@example.com", "pw").await.unwrap();
        assert!(issued.credentials.refresh_token().is_some());
        let stored = store.inner.user("gina@example.com").unwrap();
        assert_eq!(stored.credential, Some(rival));
    }

    #[tokio::test]
    async fn login_completes_interrupted_provisioning() {
        let h = harness();
        h.gateway.fail_next_provisions(1);
        h.workflow.register("dave@example.com", "pw").await.unwrap_err();

        let issued = h.workflow.authenticate("dave@example.com", "pw").await.unwrap();
        assert!(h.store.user("dave@example.com").unwrap().credential.is_some());
        assert!(issued.credentials.refresh_token().is_some());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let h = harness();
        h.workflow.register("alice@example.com", "pw1").await.unwrap();

        let wrong = h.workflow.authenticate("alice@example.com", "wrong").await.unwrap_err();
        let unknown = h.workflow.authenticate("nobody@example.com", "pw1").await.unwrap_err();
        assert_eq!(wrong.kind(), unknown.kind());
        assert_eq!(wrong.status(), unknown.status());
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn login_issues_fresh_pair_and_refresh_rotates_it() {
        let h = harness();
        h.workflow.register("alice@example.com", "pw1").await.unwrap();

        let login = h.workflow.authenticate("alice@example.com", "pw1").await.unwrap();
        let old_refresh = login.credentials.refresh_token().unwrap().to_string();

        let refreshed = h.workflow.refresh(&old_refresh).await.unwrap();
        assert_eq!(refreshed.account_id, login.account_id);
        assert_ne!(
            refreshed.credentials.access_token(),
            login.credentials.access_token()
        );

        // superseded token no longer resolves
        let err = h.workflow.refresh(&old_refresh).await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound("token")));
    }

    #[tokio::test]
    async fn refresh_with_unknown_token_is_not_found() {
        let h = harness();
        let err = h.workflow.refresh("never-issued").await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(_)));
        let err = h.workflow.refresh("").await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn refresh_rejected_by_gateway_surfaces_as_rejected() {
        let h = harness();
        let issued = h.workflow.register("erin@example.com", "pw").await.unwrap();
        // the gateway forgets the token while the store still points at it
        h.store
            .set_refresh_token(issued.account_id, "revoked-at-gateway")
            .await
            .unwrap();

        let err = h.workflow.refresh("revoked-at-gateway").await.unwrap_err();
        assert!(matches!(err, CredentialError::ProvisionerRejected(_)));
    }
}
