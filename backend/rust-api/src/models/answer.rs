use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::UserState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    #[validate(range(min = 1, message = "userId is required"))]
    pub user_id: i64,
    #[validate(range(min = 1, message = "questionId is required"))]
    pub question_id: i64,
    #[validate(length(min = 1, message = "answer is required"))]
    pub answer: String,
}

/// Result of an accepted submission.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub score_delta: i64,
    pub user: UserState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub correct: bool,
    pub new_difficulty: u8,
    pub new_streak: u32,
    pub total_score: i64,
    pub score_delta: i64,
    pub leaderboard_rank_score: u64,
    pub leaderboard_rank_streak: u64,
}

impl SubmitAnswerResponse {
    pub fn new(outcome: &AnswerOutcome, score_rank: Option<u64>, streak_rank: Option<u64>) -> Self {
        Self {
            correct: outcome.correct,
            new_difficulty: outcome.user.current_difficulty,
            new_streak: outcome.user.streak,
            total_score: outcome.user.score,
            score_delta: outcome.score_delta,
            leaderboard_rank_score: score_rank.unwrap_or(0),
            leaderboard_rank_streak: streak_rank.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_all_fields() {
        let ok = SubmitAnswerRequest {
            user_id: 1,
            question_id: 3,
            answer: "B".to_string(),
        };
        assert!(ok.validate().is_ok());

        let missing_answer = SubmitAnswerRequest {
            user_id: 1,
            question_id: 3,
            answer: String::new(),
        };
        assert!(missing_answer.validate().is_err());

        let missing_user = SubmitAnswerRequest {
            user_id: 0,
            question_id: 3,
            answer: "B".to_string(),
        };
        assert!(missing_user.validate().is_err());
    }

    #[test]
    fn unranked_is_reported_as_zero() {
        let outcome = AnswerOutcome {
            correct: false,
            score_delta: 0,
            user: UserState::new(5),
        };
        let response = SubmitAnswerResponse::new(&outcome, None, Some(3));
        assert_eq!(response.leaderboard_rank_score, 0);
        assert_eq!(response.leaderboard_rank_streak, 3);
    }
}
