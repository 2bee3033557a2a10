use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::error::QuizError;
use crate::extractors::AppQuery;
use crate::models::leaderboard::{LeaderboardQuery, RankMetric, RankQuery, RankResponse};
use crate::services::AppState;

/// GET /v1/leaderboard/score?limit=N
pub async fn top_by_score(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<LeaderboardQuery>,
) -> Result<impl IntoResponse, QuizError> {
    Ok(Json(state.leaderboard.top_by_score(query.limit).await?))
}

/// GET /v1/leaderboard/streak?limit=N
pub async fn top_by_streak(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<LeaderboardQuery>,
) -> Result<impl IntoResponse, QuizError> {
    Ok(Json(state.leaderboard.top_by_streak(query.limit).await?))
}

/// GET /v1/leaderboard/rank?userId=N&metric=score|streak
pub async fn user_rank(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<RankQuery>,
) -> Result<impl IntoResponse, QuizError> {
    if query.user_id < 1 {
        return Err(QuizError::Validation(
            "userId must be a positive integer".to_string(),
        ));
    }
    let metric = query.metric.unwrap_or(RankMetric::Score);
    let rank = state.leaderboard.get_rank(query.user_id, metric).await?;

    Ok(Json(RankResponse {
        user_id: query.user_id,
        metric,
        rank: rank.unwrap_or(0),
    }))
}
