use sqlx::FromRow;
use uuid::Uuid;

use super::{Account, StoreError, StoredUser};
use crate::{config::GatewayMode, gateway::ExternalCredential};

/// User row as stored in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String, // argon2 PHC string
    pub credential: Option<serde_json::Value>,
}

/// `users` joined through `refresh_tokens`.
#[derive(Debug, Clone, FromRow)]
pub struct TokenOwnerRow {
    pub id: Uuid,
    pub email: String,
    pub credential: Option<serde_json::Value>,
}

impl UserRow {
    pub fn into_stored(self, mode: GatewayMode) -> Result<StoredUser, StoreError> {
        Ok(StoredUser {
            credential: decode_credential(self.credential, mode)?,
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
        })
    }
}

impl TokenOwnerRow {
    pub fn into_owner(
        self,
        mode: GatewayMode,
    ) -> Result<(Account, Option<ExternalCredential>), StoreError> {
        let credential = decode_credential(self.credential, mode)?;
        Ok((
            Account {
                id: self.id,
                email: self.email,
            },
            credential,
        ))
    }
}

/// Decodes the credential column into the shape the active gateway mode expects.
/// `NULL` means provisioning has not completed yet.
pub fn decode_credential(
    raw: Option<serde_json::Value>,
    mode: GatewayMode,
) -> Result<Option<ExternalCredential>, StoreError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let credential: ExternalCredential =
        serde_json::from_value(raw).map_err(|e| StoreError::CorruptState(e.to_string()))?;
    if credential.mode() != mode {
        return Err(StoreError::CorruptState(format!(
            "stored {} credential while running in {} mode",
            credential.mode(),
            mode
        )));
    }
    Ok(Some(credential))
}
