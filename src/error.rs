use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::{
    auth::dto::{Envelope, ErrorBody},
    gateway::ProvisionerError,
    users::StoreError,
};

/// Everything the credential workflow can report to a caller.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("email already registered")]
    DuplicateEmail,
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Unknown email and wrong password collapse into this one outcome.
    #[error("user not found")]
    Unauthorized,
    #[error("user store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("gateway unavailable: {0}")]
    ProvisionerUnavailable(String),
    #[error("gateway rejected request: {0}")]
    ProvisionerRejected(String),
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CredentialError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::DuplicateEmail => "duplicate_email",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ProvisionerUnavailable(_) => "provisioner_unavailable",
            Self::ProvisionerRejected(_) => "provisioner_rejected",
            Self::CorruptState(_) => "corrupt_state",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateEmail => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::Unauthorized => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_)
            | Self::ProvisionerUnavailable(_)
            | Self::ProvisionerRejected(_)
            | Self::CorruptState(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for CredentialError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => Self::DuplicateEmail,
            StoreError::NotFound => Self::NotFound("user"),
            StoreError::CredentialConflict => Self::CorruptState(e.to_string()),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::CorruptState(msg) => Self::CorruptState(msg),
        }
    }
}

impl From<ProvisionerError> for CredentialError {
    fn from(e: ProvisionerError) -> Self {
        match e {
            ProvisionerError::Unavailable(msg) => Self::ProvisionerUnavailable(msg),
            ProvisionerError::Rejected(msg) => Self::ProvisionerRejected(msg),
            ProvisionerError::CredentialMismatch(_) => Self::CorruptState(e.to_string()),
        }
    }
}

impl IntoResponse for CredentialError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "request rejected");
        }
        let body = Envelope {
            data: vec![ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
            }],
        };
        (status, Json(body)).into_response()
    }
}
