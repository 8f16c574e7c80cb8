use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header;
use axum::http::request::Parts;

use crate::domain::UserId;
use crate::error::AppError;
use crate::state::AppState;

/// The caller behind a live session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    /// Session token the request was authenticated with, kept for logout
    pub token: String,
}

/// Extractor that requires authentication.
/// Returns 401 if no valid session found.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(parts).ok_or(AppError::Unauthorized)?;

        let id = state
            .identity
            .resolve_session(token)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser {
            id,
            token: token.to_string(),
        })
    }
}

/// JSON request body. Rejections become `AppError::BadRequest` so they
/// answer with the usual `{"message"}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
