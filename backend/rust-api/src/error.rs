use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Outcomes of the quiz pipeline that callers must tell apart.
///
/// Cache, rank index and duplicate-guard failures never surface here: they are
/// absorbed where they happen and the store of record is used instead.
#[derive(Debug, Error)]
pub enum QuizError {
    /// The same (user, question) pair was accepted moments ago; nothing changed.
    #[error("duplicate answer")]
    DuplicateAnswer,

    #[error("question {0} not found")]
    QuestionNotFound(i64),

    #[error("no question available at difficulty {0}")]
    NoQuestionAvailable(u8),

    #[error("invalid request: {0}")]
    Validation(String),

    /// The store of record rejected a read or write.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type QuizResult<T> = std::result::Result<T, QuizError>;

impl From<validator::ValidationErrors> for QuizError {
    fn from(errors: validator::ValidationErrors) -> Self {
        QuizError::Validation(errors.to_string())
    }
}

impl IntoResponse for QuizError {
    fn into_response(self) -> Response {
        let status = match &self {
            QuizError::DuplicateAnswer => return StatusCode::NO_CONTENT.into_response(),
            QuizError::QuestionNotFound(_) | QuizError::NoQuestionAvailable(_) => {
                StatusCode::NOT_FOUND
            }
            QuizError::Validation(_) => StatusCode::BAD_REQUEST,
            QuizError::Store(e) => {
                tracing::error!("Store failure: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({
            "message": self.to_string(),
            "status": status.as_u16()
        });
        (status, Json(body)).into_response()
    }
}
