#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use brainbolt_api::{
    config::Config, create_router, questions::QuestionCatalog,
    repositories::memory::MemoryBackends, AppState, Backends,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Router wired to in-memory backends, plus handles to flip outages and inspect state.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub memory: MemoryBackends,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::default())
}

pub fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let memory = MemoryBackends::new(&config);
    let state = Arc::new(AppState::new(
        config,
        Backends::from(&memory),
        Arc::new(QuestionCatalog::seeded()),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        memory,
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn submit(&self, user_id: i64, question_id: i64, answer: &str) -> (StatusCode, Value) {
        self.post_json(
            "/v1/quiz/answer",
            serde_json::json!({
                "userId": user_id,
                "questionId": question_id,
                "answer": answer,
            }),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, json)
    }
}
