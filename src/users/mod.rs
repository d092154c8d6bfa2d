//! Persistence of user records and their refresh-token references.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::gateway::ExternalCredential;

#[cfg(test)]
pub mod memory;
mod repo;
mod repo_types;

pub use repo::PgUserStore;

/// Identity handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
}

/// Full user record as loaded for authentication.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub credential: Option<ExternalCredential>,
}

impl StoredUser {
    pub fn account(&self) -> Account {
        Account {
            id: self.id,
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("no matching user")]
    NotFound,
    #[error("a different external credential is already attached")]
    CredentialConflict,
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error("stored credential is unreadable: {0}")]
    CorruptState(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user and returns the generated id. The caller holds the
    /// provisioning claim on the new row.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<Uuid, StoreError>;

    /// Attaches the gateway credential and drops the provisioning claim.
    /// Re-attaching the same blob is a no-op.
    async fn attach_external_credential(
        &self,
        id: Uuid,
        credential: &ExternalCredential,
    ) -> Result<(), StoreError>;

    /// Takes the provisioning claim on a row that has no credential yet.
    /// Returns false while another caller holds a claim younger than `lease`.
    async fn claim_provisioning(&self, id: Uuid, lease: Duration) -> Result<bool, StoreError>;

    async fn release_provisioning(&self, id: Uuid) -> Result<(), StoreError>;

    /// Replaces the user's refresh-token reference.
    async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<StoredUser, StoreError>;

    /// Exact-value lookup; a token only resolves to the user it was last issued to.
    async fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> Result<(Account, Option<ExternalCredential>), StoreError>;
}
