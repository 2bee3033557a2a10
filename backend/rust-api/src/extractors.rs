use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::QuizError;

/// JSON body that is deserialized and validated, with rejections reported as
/// 400 JSON errors instead of axum's plain-text ones.
pub struct ValidJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = QuizError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            tracing::warn!("Failed to parse JSON request body: {}", rejection);
            QuizError::Validation(rejection.body_text())
        })?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Query string extractor with the same error shape as `ValidJson`.
pub struct AppQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = QuizError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| QuizError::Validation(rejection.body_text()))?;
        Ok(AppQuery(value))
    }
}
