#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use quadrangle::config::Config;
use quadrangle::db;
use quadrangle::state::AppState;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _temp: TempDir,
}

/// Fresh on-disk database, migrated, with a cheap bcrypt cost
pub fn spawn_app() -> TestApp {
    let temp = TempDir::new().unwrap();
    let pool = db::create_pool(&temp.path().join("test.db")).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;
    let state = AppState::new(pool, config);

    TestApp {
        router: quadrangle::routes::app(state.clone()),
        state,
        _temp: temp,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    /// Register a user and return (token, user id)
    pub async fn register(&self, username: &str) -> (String, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/register",
                None,
                Some(serde_json::json!({ "username": username, "password": "hunter2" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {}: {}", username, body);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Create a course and return its id
    pub async fn create_course(&self, token: &str, code: &str) -> String {
        let (status, body) = self
            .post(
                "/api/courses",
                token,
                serde_json::json!({
                    "name": format!("Course {}", code),
                    "code": code,
                    "description": "An introduction",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create course: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn enroll(&self, token: &str, course: &str) {
        let (status, body) = self
            .request(
                Method::POST,
                &format!("/api/courses/{}/enrollment", course),
                Some(token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "enroll: {}", body);
    }

    /// Create a post and return its id
    pub async fn create_post(&self, token: &str, course: &str, content: &str) -> String {
        let (status, body) = self
            .post(
                "/api/posts",
                token,
                serde_json::json!({ "courseId": course, "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create post: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn toggle_like(&self, token: &str, post: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            &format!("/api/posts/{}/like", post),
            Some(token),
            None,
        )
        .await
    }

    pub async fn karma(&self, token: &str) -> i64 {
        let (_, body) = self.get("/api/users/me", token).await;
        body["karma"].as_i64().unwrap()
    }
}
