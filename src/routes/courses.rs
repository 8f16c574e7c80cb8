use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::courses::NewCourse;
use crate::db::models::{Course, Post};
use crate::domain::CourseId;
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::routes::required;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateCourseRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub instructor: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/courses", get(list).post(create))
        .route("/api/courses/my", get(mine))
        .route("/api/courses/{id}", get(show).delete(remove))
        .route(
            "/api/courses/{id}/enrollment",
            post(enroll).delete(unenroll),
        )
        .route("/api/courses/{id}/posts", get(feed))
}

async fn list(State(state): State<AppState>, _user: CurrentUser) -> AppResult<Json<Vec<Course>>> {
    Ok(Json(state.courses.list_courses().await?))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<CreateCourseRequest>,
) -> AppResult<Response> {
    let course = NewCourse {
        name: required(req.name, "name")?,
        code: required(req.code, "code")?,
        description: required(req.description, "description")?,
        instructor: req.instructor,
    };
    let created = state.courses.create_course(&user.id, course).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn mine(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Course>>> {
    Ok(Json(state.courses.list_courses_for_user(&user.id).await?))
}

async fn show(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Course>> {
    Ok(Json(state.courses.get_course(&CourseId(id)).await?))
}

async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.courses.delete_course(&user.id, &CourseId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enroll(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Course>> {
    let id = CourseId(id);
    state.courses.enroll(&user.id, &id).await?;
    Ok(Json(state.courses.get_course(&id).await?))
}

async fn unenroll(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Course>> {
    let id = CourseId(id);
    state.courses.unenroll(&user.id, &id).await?;
    Ok(Json(state.courses.get_course(&id).await?))
}

async fn feed(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Post>>> {
    let posts = state
        .content
        .list_posts_for_course(&user.id, &CourseId(id))
        .await?;
    Ok(Json(posts))
}
