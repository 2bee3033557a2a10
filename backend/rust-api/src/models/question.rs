use serde::{Deserialize, Serialize};

/// A quiz question. `answer_key` is compared verbatim with the submitted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub difficulty: u8,
    pub prompt: String,
    pub options: Vec<String>,
    pub answer_key: String,
}

impl Question {
    pub fn is_correct(&self, answer: &str) -> bool {
        self.answer_key == answer
    }
}

/// What a player sees when asking for the next question; the answer key stays server-side.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestionResponse {
    pub question_id: i64,
    pub difficulty: u8,
    pub question: String,
    pub options: Vec<String>,
    pub current_difficulty: u8,
    pub user_id: i64,
}

impl NextQuestionResponse {
    pub fn new(question: Question, current_difficulty: u8, user_id: i64) -> Self {
        Self {
            question_id: question.id,
            difficulty: question.difficulty,
            question: question.prompt,
            options: question.options,
            current_difficulty,
            user_id,
        }
    }
}
