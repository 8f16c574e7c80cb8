use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::{ChatSummary, Message};
use crate::domain::{ChatId, UserId};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::routes::required;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChatRequest {
    pub participant_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chats", get(inbox).post(open_chat))
        .route(
            "/api/chats/{id}/messages",
            get(list_messages).post(send_message),
        )
}

async fn inbox(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<ChatSummary>>> {
    Ok(Json(state.messaging.list_chats_for_user(&user.id).await?))
}

async fn open_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<OpenChatRequest>,
) -> AppResult<Response> {
    let peer = UserId(required(req.participant_id, "participantId")?);

    let (chat, created) = state
        .messaging
        .find_or_create_chat(&user.id, &peer)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(chat)).into_response())
}

async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(
        state.messaging.list_messages(&user.id, &ChatId(id)).await?,
    ))
}

async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> AppResult<Response> {
    let content = required(req.content, "content")?;
    let message = state
        .messaging
        .send_message(&user.id, &ChatId(id), &content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}
