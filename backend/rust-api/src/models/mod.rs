pub mod answer;
pub mod leaderboard;
pub mod question;
pub mod user;

pub use answer::{AnswerOutcome, SubmitAnswerRequest, SubmitAnswerResponse};
pub use leaderboard::{RankMetric, RankedEntry};
pub use question::{NextQuestionResponse, Question};
pub use user::{UserMetricsResponse, UserState};
