use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::UserProfile;
use crate::domain::UserId;
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::routes::required;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub user: UserProfile,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CredentialsRequest>,
) -> AppResult<Response> {
    let username = required(req.username, "username")?;
    let password = required(req.password, "password")?;

    let user = state.identity.register(&username, &password).await?;
    let session = open_session(&state, &user).await?;

    Ok((StatusCode::CREATED, Json(session)).into_response())
}

async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CredentialsRequest>,
) -> AppResult<Response> {
    let username = required(req.username, "username")?;
    let password = required(req.password, "password")?;

    let user = state.identity.authenticate(&username, &password).await?;
    let session = open_session(&state, &user).await?;

    Ok((StatusCode::OK, Json(session)).into_response())
}

async fn logout(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    state.identity.close_session(&user.token).await?;
    tracing::debug!(user_id = %user.id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

async fn open_session(state: &AppState, user: &UserId) -> AppResult<SessionResponse> {
    let token = state.identity.open_session(user).await?;
    let user = state.identity.profile(user).await?;
    Ok(SessionResponse { token, user })
}
