use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 10;

/// Progression record for one player. The store of record owns it; the cache
/// holds JSON copies of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub id: i64,
    pub username: String,
    pub score: i64,
    pub streak: u32,
    pub max_streak: u32,
    pub total_correct: u32,
    pub total_answered: u32,
    pub current_difficulty: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answered_at: Option<DateTime<Utc>>,
    /// Point up to which inactivity has already been charged against the streak.
    /// Cleared by every answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak_decayed_at: Option<DateTime<Utc>>,
}

impl UserState {
    /// Zeroed record used on first reference to an unknown id.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            username: default_username(id),
            score: 0,
            streak: 0,
            max_streak: 0,
            total_correct: 0,
            total_answered: 0,
            current_difficulty: MIN_DIFFICULTY,
            last_answered_at: None,
            streak_decayed_at: None,
        }
    }

    /// Lifetime accuracy in [0, 1]; 0 until something has been answered.
    pub fn accuracy(&self) -> f64 {
        if self.total_answered == 0 {
            0.0
        } else {
            self.total_correct as f64 / self.total_answered as f64
        }
    }
}

pub fn default_username(id: i64) -> String {
    format!("player-{}", id)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserIdQuery {
    #[validate(range(min = 1, message = "userId must be a positive integer"))]
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetricsResponse {
    pub current_difficulty: u8,
    pub streak: u32,
    pub max_streak: u32,
    pub total_score: i64,
    /// Percentage, 0..=100
    pub accuracy: f64,
    pub total_correct: u32,
    pub total_answered: u32,
}

impl From<&UserState> for UserMetricsResponse {
    fn from(user: &UserState) -> Self {
        Self {
            current_difficulty: user.current_difficulty,
            streak: user.streak,
            max_streak: user.max_streak,
            total_score: user.score,
            accuracy: user.accuracy() * 100.0,
            total_correct: user.total_correct,
            total_answered: user.total_answered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_starts_at_lowest_difficulty() {
        let user = UserState::new(7);
        assert_eq!(user.current_difficulty, MIN_DIFFICULTY);
        assert_eq!(user.score, 0);
        assert_eq!(user.username, "player-7");
        assert!(user.last_answered_at.is_none());
    }

    #[test]
    fn accuracy_is_zero_without_answers() {
        let mut user = UserState::new(1);
        assert_eq!(user.accuracy(), 0.0);

        user.total_answered = 4;
        user.total_correct = 3;
        assert_eq!(user.accuracy(), 0.75);
        assert_eq!(UserMetricsResponse::from(&user).accuracy, 75.0);
    }

    #[test]
    fn cache_json_uses_camel_case() {
        let user = UserState::new(3);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["maxStreak"], 0);
        assert_eq!(json["currentDifficulty"], 1);
        assert!(json.get("lastAnsweredAt").is_none());

        let back: UserState = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }
}
