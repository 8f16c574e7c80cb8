use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::{Course, Post, UserProfile};
use crate::domain::UserId;
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::routes::required;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RenameRequest {
    pub username: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/me", get(me).put(rename).delete(delete_me))
        .route("/api/users/{id}", get(profile))
        .route("/api/users/{id}/posts", get(posts_by))
        .route("/api/users/{id}/courses", get(courses_of))
}

async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<UserProfile>> {
    Ok(Json(state.identity.profile(&user.id).await?))
}

async fn rename(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<RenameRequest>,
) -> AppResult<Json<UserProfile>> {
    let username = required(req.username, "username")?;
    Ok(Json(state.identity.rename(&user.id, &username).await?))
}

async fn delete_me(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    state.identity.delete_user(&user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn profile(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(state.identity.profile(&UserId(id)).await?))
}

async fn posts_by(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Post>>> {
    let posts = state
        .content
        .list_posts_by_author(&user.id, &UserId(id))
        .await?;
    Ok(Json(posts))
}

async fn courses_of(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Course>>> {
    let id = UserId(id);
    // 404 for unknown users rather than an empty list
    state.identity.profile(&id).await?;
    Ok(Json(state.courses.list_courses_for_user(&id).await?))
}
