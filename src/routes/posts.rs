use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::{LikeState, Post};
use crate::domain::{CommentId, CourseId, PostId};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::routes::required;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub course_id: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", post(create_post))
        .route("/api/posts/home", get(home))
        .route("/api/posts/liked", get(liked))
        .route("/api/posts/{id}", delete(delete_post))
        .route("/api/posts/{id}/like", post(toggle_like))
        .route("/api/posts/{id}/comments", post(create_comment))
        .route("/api/comments/{id}", delete(delete_comment))
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> AppResult<Response> {
    let course = CourseId(required(req.course_id, "courseId")?);
    let content = required(req.content, "content")?;

    let post = state
        .content
        .create_post(&user.id, &course, &content, req.image.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(post)).into_response())
}

async fn home(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(
        state.content.list_posts_for_enrolled_courses(&user.id).await?,
    ))
}

async fn liked(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<PostId>>> {
    Ok(Json(state.content.liked_post_ids(&user.id).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.content.delete_post(&user.id, &PostId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_like(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<LikeState>> {
    Ok(Json(state.content.toggle_like(&user.id, &PostId(id)).await?))
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<CreateCommentRequest>,
) -> AppResult<Response> {
    let content = required(req.content, "content")?;
    let comment = state
        .content
        .create_comment(&user.id, &PostId(id), &content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state
        .content
        .delete_comment(&user.id, &CommentId(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
