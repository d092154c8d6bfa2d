use std::{future::Future, time::Duration};

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    repo_types::{TokenOwnerRow, UserRow},
    Account, StoreError, StoredUser, UserStore,
};
use crate::{config::GatewayMode, gateway::ExternalCredential};

/// Postgres-backed [`UserStore`].
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
    mode: GatewayMode,
    timeout: Duration,
}

impl PgUserStore {
    pub fn new(db: PgPool, mode: GatewayMode, timeout: Duration) -> Self {
        Self { db, mode, timeout }
    }

    /// Runs one statement under the store deadline.
    async fn bounded<T, F>(&self, what: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(query = what, timeout = ?self.timeout, "store query timed out");
                Err(StoreError::Unavailable(format!("{what} timed out")))
            }
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<Uuid, StoreError> {
        self.bounded("create_user", async {
            sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO users (email, password_hash)
                VALUES ($1, $2)
                RETURNING id
                "#,
            )
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::DuplicateEmail
                }
                other => other.into(),
            })
        })
        .await
    }

    async fn attach_external_credential(
        &self,
        id: Uuid,
        credential: &ExternalCredential,
    ) -> Result<(), StoreError> {
        self.bounded("attach_external_credential", async {
            let updated = sqlx::query(
                r#"
                UPDATE users
                   SET credential = $2,
                       provisioning_claimed_at = NULL
                 WHERE id = $1
                   AND (credential IS NULL OR credential = $2)
                "#,
            )
            .bind(id)
            .bind(Json(credential))
            .execute(&self.db)
            .await?
            .rows_affected();
            if updated == 1 {
                debug!(user_id = %id, "external credential attached");
                return Ok(());
            }

            let exists: bool =
                sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)"#)
                    .bind(id)
                    .fetch_one(&self.db)
                    .await?;
            Err(if exists {
                StoreError::CredentialConflict
            } else {
                StoreError::NotFound
            })
        })
        .await
    }

    async fn claim_provisioning(&self, id: Uuid, lease: Duration) -> Result<bool, StoreError> {
        let claimed = self
            .bounded("claim_provisioning", async {
                sqlx::query(
                    r#"
                    UPDATE users
                       SET provisioning_claimed_at = now()
                     WHERE id = $1
                       AND credential IS NULL
                       AND (provisioning_claimed_at IS NULL
                            OR provisioning_claimed_at < now() - make_interval(secs => $2))
                    "#,
                )
                .bind(id)
                .bind(lease.as_secs_f64())
                .execute(&self.db)
                .await
                .map_err(StoreError::from)
            })
            .await?
            .rows_affected()
            == 1;
        debug!(user_id = %id, claimed, "provisioning claim");
        Ok(claimed)
    }

    async fn release_provisioning(&self, id: Uuid) -> Result<(), StoreError> {
        self.bounded("release_provisioning", async {
            sqlx::query(r#"UPDATE users SET provisioning_claimed_at = NULL WHERE id = $1"#)
                .bind(id)
                .execute(&self.db)
                .await
                .map_err(StoreError::from)
                .map(|_| ())
        })
        .await
    }

    async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
        self.bounded("set_refresh_token", async {
            sqlx::query(
                r#"
                INSERT INTO refresh_tokens (user_id, token)
                VALUES ($1, $2)
                ON CONFLICT (user_id)
                DO UPDATE SET token = EXCLUDED.token, updated_at = now()
                "#,
            )
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    StoreError::NotFound
                }
                other => other.into(),
            })
            .map(|_| ())
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<StoredUser, StoreError> {
        let row = self
            .bounded("find_by_email", async {
                sqlx::query_as::<_, UserRow>(
                    r#"
                    SELECT id, email, password_hash, credential
                    FROM users
                    WHERE email = $1
                    "#,
                )
                .bind(email)
                .fetch_optional(&self.db)
                .await
                .map_err(StoreError::from)
            })
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_stored(self.mode)
    }

    async fn find_by_refresh_token(
        &self,
        token: &str,
    ) -> Result<(Account, Option<ExternalCredential>), StoreError> {
        let row = self
            .bounded("find_by_refresh_token", async {
                sqlx::query_as::<_, TokenOwnerRow>(
                    r#"
                    SELECT u.id, u.email, u.credential
                    FROM refresh_tokens t
                    JOIN users u ON u.id = t.user_id
                    WHERE t.token = $1
                    "#,
                )
                .bind(token)
                .fetch_optional(&self.db)
                .await
                .map_err(StoreError::from)
            })
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_owner(self.mode)
    }
}
