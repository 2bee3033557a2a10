use std::sync::Arc;

use super::user_service::UserService;
use crate::error::QuizResult;
use crate::models::question::NextQuestionResponse;
use crate::questions::QuestionProvider;

pub struct QuestionService {
    users: Arc<UserService>,
    provider: Arc<dyn QuestionProvider>,
}

impl QuestionService {
    pub fn new(users: Arc<UserService>, provider: Arc<dyn QuestionProvider>) -> Self {
        Self { users, provider }
    }

    /// Next question at the player's current difficulty.
    pub async fn get_next_question(&self, user_id: i64) -> QuizResult<NextQuestionResponse> {
        let user = self.users.get_user_state(user_id).await?;
        let question = self
            .provider
            .select_next_question(user_id, user.current_difficulty)
            .await?;

        tracing::debug!(
            user_id,
            question_id = question.id,
            difficulty = user.current_difficulty,
            "Serving next question"
        );

        Ok(NextQuestionResponse::new(
            question,
            user.current_difficulty,
            user_id,
        ))
    }
}
