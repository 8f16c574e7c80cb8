pub mod auth;
pub mod chats;
pub mod courses;
pub mod posts;
pub mod users;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// The full HTTP surface with tracing and, when configured, CORS
pub fn app(state: AppState) -> Router {
    let cors = state.config.server.cors_origin.as_deref().and_then(cors_layer);

    let mut app = Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(courses::router())
        .merge(posts::router())
        .merge(chats::router());

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    match origin.parse::<HeaderValue>() {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        ),
        Err(e) => {
            tracing::warn!("Ignoring invalid cors_origin {:?}: {}", origin, e);
            None
        }
    }
}

/// Unwrap a request body field, answering 400 naming the field when absent
pub(crate) fn required<T>(value: Option<T>, field: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::BadRequest(format!("Missing field: {}", field)))
}
