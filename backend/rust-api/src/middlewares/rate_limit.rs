use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::services::AppState;

/// Quiz request bodies are tiny; anything bigger is not worth buffering for a key.
const MAX_KEYED_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct UserKey {
    #[serde(rename = "userId")]
    user_id: Option<i64>,
}

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // comma separated list; the first hop is the client
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

fn user_from_query(request: &Request) -> Option<i64> {
    Query::<UserKey>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(key)| key.user_id)
}

/// Reads `userId` from a JSON body and hands back an equivalent request.
async fn user_from_body(request: Request) -> Result<(Option<i64>, Request), Response> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_KEYED_BODY_BYTES).await.map_err(|e| {
        tracing::warn!("Failed to buffer request body for rate limiting: {}", e);
        too_large()
    })?;
    let user_id = serde_json::from_slice::<UserKey>(&bytes)
        .ok()
        .and_then(|key| key.user_id);
    Ok((user_id, Request::from_parts(parts, Body::from(bytes))))
}

fn too_large() -> Response {
    let status = StatusCode::PAYLOAD_TOO_LARGE;
    (
        status,
        Json(serde_json::json!({
            "message": "Request body too large",
            "status": status.as_u16()
        })),
    )
        .into_response()
}

fn too_many_requests() -> Response {
    let status = StatusCode::TOO_MANY_REQUESTS;
    (
        status,
        Json(serde_json::json!({
            "message": "Rate limit exceeded",
            "status": status.as_u16()
        })),
    )
        .into_response()
}

/// Fixed-window limit per player on the quiz routes. The player comes from
/// `userId` in the query string or JSON body; anonymous calls are keyed by IP.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if !state.config.rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let (user_id, request) = match user_from_query(&request) {
        Some(user_id) => (Some(user_id), request),
        None if request.method() == Method::POST => user_from_body(request).await?,
        None => (None, request),
    };

    let key = match user_id {
        Some(uid) => format!("user:{}", uid),
        None => format!(
            "ip:{}",
            extract_client_ip_from(request.headers(), request.extensions())
        ),
    };

    match state.rate_limiter.allow(&key).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("Rate limit exceeded for {}", key);
            return Err(too_many_requests());
        }
        Err(e) => {
            // limiter outage must not take the quiz down with it
            tracing::error!("Rate limit check failed, allowing request: {}", e);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let ext = axum::http::Extensions::new();
        assert_eq!(extract_client_ip_from(&headers, &ext), "203.0.113.9");
    }

    #[test]
    fn missing_address_is_unknown() {
        assert_eq!(
            extract_client_ip_from(&HeaderMap::new(), &axum::http::Extensions::new()),
            "unknown"
        );
    }

    #[test]
    fn query_user_is_found() {
        let request = Request::builder()
            .uri("/v1/quiz/next?userId=17")
            .body(Body::empty())
            .unwrap();
        assert_eq!(user_from_query(&request), Some(17));

        let request = Request::builder()
            .uri("/v1/quiz/next")
            .body(Body::empty())
            .unwrap();
        assert_eq!(user_from_query(&request), None);
    }

    #[tokio::test]
    async fn body_user_is_found_and_body_preserved() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/quiz/answer")
            .body(Body::from(r#"{"userId":5,"questionId":1,"answer":"B"}"#))
            .unwrap();

        let (user_id, request) = user_from_body(request).await.unwrap();
        assert_eq!(user_id, Some(5));

        let bytes = to_bytes(request.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"{\"userId\":5"));
    }
}
