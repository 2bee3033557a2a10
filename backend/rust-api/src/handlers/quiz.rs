use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;
use validator::Validate;

use crate::error::QuizError;
use crate::extractors::{AppQuery, ValidJson};
use crate::models::answer::{SubmitAnswerRequest, SubmitAnswerResponse};
use crate::models::user::UserIdQuery;
use crate::services::AppState;

/// GET /v1/quiz/next?userId=N
pub async fn next_question(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<UserIdQuery>,
) -> Result<impl IntoResponse, QuizError> {
    query.validate()?;
    let response = state.questions.get_next_question(query.user_id).await?;
    Ok(Json(response))
}

/// POST /v1/quiz/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, QuizError> {
    let outcome = state
        .answers
        .submit_answer(req.user_id, req.question_id, &req.answer)
        .await?;

    let (score_rank, streak_rank) = state.leaderboard.ranks_for(req.user_id).await;

    Ok(Json(SubmitAnswerResponse::new(
        &outcome,
        score_rank,
        streak_rank,
    )))
}

/// GET /v1/quiz/metrics?userId=N
pub async fn user_metrics(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<UserIdQuery>,
) -> Result<impl IntoResponse, QuizError> {
    query.validate()?;
    let metrics = state.users.get_user_metrics(query.user_id).await?;
    Ok(Json(metrics))
}
