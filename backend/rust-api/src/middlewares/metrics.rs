use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Routes reported under their own label; everything else is `unmatched`.
const KNOWN_PATHS: &[&str] = &[
    "/health",
    "/metrics",
    "/v1/quiz/next",
    "/v1/quiz/answer",
    "/v1/quiz/metrics",
    "/v1/leaderboard/score",
    "/v1/leaderboard/streak",
    "/v1/leaderboard/rank",
];

/// Request count and latency per method, route and status.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), path, status.as_str()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str(), path])
        .observe(duration);

    response
}

/// Keeps the label set bounded: arbitrary paths from scanners would otherwise
/// create a new series each.
fn normalize_path(path: &str) -> &'static str {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    KNOWN_PATHS
        .iter()
        .find(|known| **known == trimmed)
        .copied()
        .unwrap_or("unmatched")
}
