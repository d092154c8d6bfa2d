use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Account, StoreError, StoredUser, UserStore};
use crate::gateway::ExternalCredential;

/// In-process [`UserStore`] with the same uniqueness and lookup rules as the Postgres one.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, StoredUser>,
    refresh_tokens: HashMap<Uuid, String>,
    claims: HashMap<Uuid, Instant>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, email: &str) -> Option<StoredUser> {
        let inner = self.inner.lock().unwrap();
        inner.users.values().find(|u| u.email == email).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.values().any(|u| u.email == email) {
            return Err(StoreError::DuplicateEmail);
        }
        let id = Uuid::new_v4();
        inner.users.insert(
            id,
            StoredUser {
                id,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                credential: None,
            },
        );
        inner.claims.insert(id, Instant::now());
        Ok(id)
    }

    async fn attach_external_credential(
        &self,
        id: Uuid,
        credential: &ExternalCredential,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        match &user.credential {
            Some(existing) if existing != credential => Err(StoreError::CredentialConflict),
            _ => {
                user.credential = Some(credential.clone());
                inner.claims.remove(&id);
                Ok(())
            }
        }
    }

    async fn claim_provisioning(&self, id: Uuid, lease: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get(&id) {
            Some(user) if user.credential.is_none() => {}
            _ => return Ok(false),
        }
        if let Some(at) = inner.claims.get(&id) {
            if at.elapsed() < lease {
                return Ok(false);
            }
        }
        inner.claims.insert(id, Instant::now());
        Ok(true)
    }

    async fn release_provisioning(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().unwrap().claims.remove(&id);
        Ok(())
    }

    async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.users.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        inner.refresh_tokens.insert(id, token.to_string());
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<StoredUser, StoreError> {
        self.user(email).ok_or(StoreError::NotFound)
    }

    async fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> Result<(Account, Option<ExternalCredential>), StoreError> {
        let inner = self.inner.lock().unwrap();
        let id = inner
            .refresh_tokens
            .iter()
            .find(|(_, stored)| stored.as_str() == token)
            .map(|(id, _)| *id)
            .ok_or(StoreError::NotFound)?;
        let user = inner.users.get(&id).ok_or(StoreError::NotFound)?;
        Ok((user.account(), user.credential.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryUserStore::new();
        store.create_user("a@example.com", "h").await.unwrap();
        let err = store.create_user("a@example.com", "h2").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn refresh_lookup_is_exact() {
        let store = MemoryUserStore::new();
        let alice = store.create_user("alice@example.com", "h").await.unwrap();
        let bob = store.create_user("bob@example.com", "h").await.unwrap();
        store.set_refresh_token(alice, "abc").await.unwrap();
        store.set_refresh_token(bob, "xxabcxx").await.unwrap();

        let (owner, _) = store.find_by_refresh_token("abc").await.unwrap();
        assert_eq!(owner.id, alice);
        assert!(matches!(
            store.find_by_refresh_token("bc").await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn provisioning_claim_is_exclusive_until_released_or_stale() {
        let store = MemoryUserStore::new();
        let id = store.create_user("a@example.com", "h").await.unwrap();
        let lease = Duration::from_secs(60);

        assert!(!store.claim_provisioning(id, lease).await.unwrap());
        assert!(store.claim_provisioning(id, Duration::ZERO).await.unwrap());

        store.release_provisioning(id).await.unwrap();
        assert!(store.claim_provisioning(id, lease).await.unwrap());
        assert!(!store.claim_provisioning(id, lease).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = MemoryUserStore::new();
        let err = store.set_refresh_token(Uuid::new_v4(), "t").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
