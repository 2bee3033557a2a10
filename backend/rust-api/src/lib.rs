use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod questions;
pub mod repositories;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{QuizError, QuizResult};
pub use services::{AppState, Backends};

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/v1/quiz",
            quiz_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::rate_limit::rate_limit_middleware,
            )),
        )
        .nest("/v1/leaderboard", leaderboard_routes())
        .with_state(app_state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn quiz_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/next", get(handlers::quiz::next_question))
        .route("/answer", post(handlers::quiz::submit_answer))
        .route("/metrics", get(handlers::quiz::user_metrics))
}

fn leaderboard_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/score", get(handlers::leaderboard::top_by_score))
        .route("/streak", get(handlers::leaderboard::top_by_streak))
        .route("/rank", get(handlers::leaderboard::user_rank))
}
