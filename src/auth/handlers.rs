use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{CredentialsRequest, Envelope, Issued, Profile, RefreshRequest},
        extractors::GatewayPrincipal,
    },
    error::CredentialError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile", get(profile))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, CredentialError> {
    payload
        .map(|Json(p)| p)
        .map_err(|e| CredentialError::InvalidInput(e.body_text()))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<Envelope<Issued>>, CredentialError> {
    let req = body(payload)?;
    let issued = state.workflow.register(&req.email, &req.password).await?;
    Ok(Json(Envelope { data: issued }))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<Envelope<Issued>>, CredentialError> {
    let req = body(payload)?;
    let issued = state.workflow.authenticate(&req.email, &req.password).await?;
    Ok(Json(Envelope { data: issued }))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<Envelope<Issued>>, CredentialError> {
    let req = body(payload)?;
    let issued = state.workflow.refresh(&req.refresh_token).await?;
    Ok(Json(Envelope { data: issued }))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    principal: GatewayPrincipal,
) -> Json<Envelope<Profile>> {
    Json(Envelope {
        data: state.workflow.profile(&principal),
    })
}
