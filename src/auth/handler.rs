use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::lib::{Accounts, Credentials, Registration};
use super::middleware::{CurrentUser, header_token};
use crate::api::Payload;
use crate::error::AppError;
use crate::handler::AppState;
use crate::model::User;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: User,
}

pub async fn register(
    State(state): State<AppState>,
    Payload(payload): Payload<Registration>,
) -> Result<Response, AppError> {
    let user = Accounts::new(&state.db).register(payload).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

pub async fn obtain_token(
    State(state): State<AppState>,
    Payload(credentials): Payload<Credentials>,
) -> Result<Json<TokenResponse>, AppError> {
    let accounts = Accounts::new(&state.db);
    let Some(user) = accounts.check_credentials(&credentials).await? else {
        tracing::warn!(username = %credentials.username, "failed token request");
        return Err(AppError::validation(
            "non_field_errors",
            "Unable to log in with provided credentials.",
        ));
    };
    let token = accounts.issue_token(user.id, state.token_ttl_hours).await?;
    tracing::info!(user_id = user.id, "issued api token");
    Ok(Json(TokenResponse { token, user }))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    if let Some(token) = header_token(&headers)? {
        Accounts::new(&state.db).revoke_token(&token).await?;
        tracing::info!(user_id = principal.id(), "revoked api token");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(CurrentUser(principal): CurrentUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "user": principal.user,
        "permissions": principal.permissions,
    }))
}
