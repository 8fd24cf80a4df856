use axum::{extract::State, Json};
use serde::Deserialize;

use super::ApiError;
use crate::application::services::credential_store::{CredentialPair, CredentialStatus};
use crate::application::state::AppState;

#[derive(Deserialize)]
pub struct CredentialUpdate {
    pub auth_token: String,
    pub ct0: String,
}

/// `GET /credentials`
pub async fn get_credentials(State(state): State<AppState>) -> Json<CredentialStatus> {
    Json(state.credentials.status().await)
}

/// `PUT /credentials`
pub async fn put_credentials(
    State(state): State<AppState>,
    Json(update): Json<CredentialUpdate>,
) -> Result<Json<CredentialStatus>, ApiError> {
    let pair = CredentialPair::new(&update.auth_token, &update.ct0)?;
    Ok(Json(state.credentials.refresh(pair).await?))
}
