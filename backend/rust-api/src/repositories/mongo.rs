use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_document, DateTime as BsonDateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::{AskedStore, UserStore};
use crate::metrics::track_store_operation;
use crate::models::leaderboard::RankMetric;
use crate::models::user::{UserState, MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

const USERS: &str = "users";
const USER_QUESTIONS: &str = "user_questions";

/// Stored shape of a user. Counters are kept as 64-bit integers so range
/// queries compare numerically regardless of how the document was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: i64,
    username: String,
    score: i64,
    streak: i64,
    max_streak: i64,
    total_correct: i64,
    total_answered: i64,
    current_difficulty: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_answered_at: Option<BsonDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    streak_decayed_at: Option<BsonDateTime>,
}

impl From<&UserState> for UserDocument {
    fn from(user: &UserState) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            score: user.score,
            streak: user.streak as i64,
            max_streak: user.max_streak as i64,
            total_correct: user.total_correct as i64,
            total_answered: user.total_answered as i64,
            current_difficulty: user.current_difficulty as i32,
            last_answered_at: user.last_answered_at.map(chrono_to_bson),
            streak_decayed_at: user.streak_decayed_at.map(chrono_to_bson),
        }
    }
}

fn counter(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

impl From<UserDocument> for UserState {
    fn from(doc: UserDocument) -> Self {
        let difficulty = doc
            .current_difficulty
            .clamp(MIN_DIFFICULTY as i32, MAX_DIFFICULTY as i32) as u8;
        Self {
            id: doc.id,
            username: doc.username,
            score: doc.score,
            streak: counter(doc.streak),
            max_streak: counter(doc.max_streak),
            total_correct: counter(doc.total_correct),
            total_answered: counter(doc.total_answered),
            current_difficulty: difficulty,
            last_answered_at: doc.last_answered_at.and_then(bson_to_chrono),
            streak_decayed_at: doc.streak_decayed_at.and_then(bson_to_chrono),
        }
    }
}

fn metric_field(metric: RankMetric) -> &'static str {
    match metric {
        RankMetric::Score => "score",
        RankMetric::Streak => "max_streak",
    }
}

fn descending_by(metric: RankMetric) -> Document {
    let mut sort = Document::new();
    sort.insert(metric_field(metric), -1);
    sort.insert("_id", 1);
    sort
}

fn greater_than(metric: RankMetric, value: i64) -> Document {
    let mut filter = Document::new();
    filter.insert(metric_field(metric), doc! { "$gt": value });
    filter
}

pub struct MongoUserStore {
    db: Database,
    users: Collection<UserDocument>,
    reads: RetryConfig,
    writes: RetryConfig,
}

impl MongoUserStore {
    pub fn new(db: Database) -> Self {
        let users = db.collection::<UserDocument>(USERS);
        Self {
            db,
            users,
            reads: RetryConfig::default(),
            writes: RetryConfig::store_write(),
        }
    }

    /// Descending indexes backing top-N and count-above queries.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let models = vec![
            IndexModel::builder().keys(doc! { "score": -1, "_id": 1 }).build(),
            IndexModel::builder()
                .keys(doc! { "max_streak": -1, "_id": 1 })
                .build(),
        ];
        self.users
            .create_indexes(models)
            .await
            .context("Failed to create user indexes")?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn get_or_create(&self, user_id: i64) -> Result<UserState> {
        let mut defaults = to_document(&UserDocument::from(&UserState::new(user_id)))
            .context("Failed to encode default user")?;
        defaults.remove("_id");
        let users = &self.users;
        let defaults = &defaults;

        // concurrent first-time upserts can race on _id; the retry then finds the winner
        let found = track_store_operation(
            "get_or_create",
            USERS,
            async {
                retry_async_with_config("users.get_or_create", self.writes.clone(), || async move {
                    users
                        .find_one_and_update(
                            doc! { "_id": user_id },
                            doc! { "$setOnInsert": defaults.clone() },
                        )
                        .upsert(true)
                        .return_document(ReturnDocument::After)
                        .await
                })
                .await
                .context("Failed to load or create user")
            },
        )
        .await?;

        found
            .map(UserState::from)
            .ok_or_else(|| anyhow!("User {} missing after upsert", user_id))
    }

    async fn find(&self, user_id: i64) -> Result<Option<UserState>> {
        let users = &self.users;
        let found = track_store_operation("find_one", USERS, async {
            retry_async_with_config("users.find_one", self.reads.clone(), || async move {
                users.find_one(doc! { "_id": user_id }).await
            })
            .await
            .context("Failed to load user")
        })
        .await?;
        Ok(found.map(UserState::from))
    }

    async fn save(&self, user: &UserState) -> Result<()> {
        let document = UserDocument::from(user);
        let users = &self.users;
        let document = &document;
        let id = user.id;

        track_store_operation("replace_one", USERS, async {
            retry_async_with_config("users.replace_one", self.writes.clone(), || async move {
                users
                    .replace_one(doc! { "_id": id }, document)
                    .upsert(true)
                    .await
            })
            .await
            .context("Failed to save user")
        })
        .await?;
        Ok(())
    }

    async fn update_streak(
        &self,
        user_id: i64,
        streak: u32,
        decayed_at: DateTime<Utc>,
    ) -> Result<()> {
        let users = &self.users;
        let decayed_at = chrono_to_bson(decayed_at);
        track_store_operation("update_one", USERS, async {
            retry_async_with_config("users.update_streak", self.writes.clone(), || async move {
                users
                    .update_one(
                        doc! { "_id": user_id },
                        doc! { "$set": {
                            "streak": streak as i64,
                            "streak_decayed_at": decayed_at,
                        } },
                    )
                    .await
            })
            .await
            .context("Failed to update streak")
        })
        .await?;
        Ok(())
    }

    async fn top_by(&self, metric: RankMetric, limit: usize) -> Result<Vec<UserState>> {
        let users = &self.users;
        let docs: Vec<UserDocument> = track_store_operation("find_top", USERS, async {
            retry_async_with_config("users.find_top", self.reads.clone(), || async move {
                users
                    .find(doc! {})
                    .sort(descending_by(metric))
                    .limit(limit as i64)
                    .await?
                    .try_collect::<Vec<_>>()
                    .await
            })
            .await
            .context("Failed to query leaderboard")
        })
        .await?;
        Ok(docs.into_iter().map(UserState::from).collect())
    }

    async fn count_above(&self, metric: RankMetric, value: i64) -> Result<u64> {
        let users = &self.users;
        track_store_operation("count_documents", USERS, async {
            retry_async_with_config("users.count_above", self.reads.clone(), || async move {
                users.count_documents(greater_than(metric, value)).await
            })
            .await
            .context("Failed to count users above value")
        })
        .await
    }

    async fn all_users(&self) -> Result<Vec<UserState>> {
        let users = &self.users;
        let docs: Vec<UserDocument> = track_store_operation("find_all", USERS, async {
            retry_async_with_config("users.find_all", self.reads.clone(), || async move {
                users.find(doc! {}).await?.try_collect::<Vec<_>>().await
            })
            .await
            .context("Failed to list users")
        })
        .await?;
        Ok(docs.into_iter().map(UserState::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AskedDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: i64,
    question_id: i64,
    asked_at: BsonDateTime,
}

fn asked_key(user_id: i64, question_id: i64) -> String {
    format!("{}:{}", user_id, question_id)
}

pub struct MongoAskedStore {
    asked: Collection<AskedDocument>,
}

impl MongoAskedStore {
    pub fn new(db: &Database) -> Self {
        Self {
            asked: db.collection::<AskedDocument>(USER_QUESTIONS),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        self.asked
            .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).build())
            .await
            .context("Failed to create user_questions index")?;
        Ok(())
    }
}

#[async_trait]
impl AskedStore for MongoAskedStore {
    async fn record_asked(&self, user_id: i64, question_id: i64) -> Result<()> {
        let asked = &self.asked;
        let asked_at = chrono_to_bson(Utc::now());

        track_store_operation("upsert", USER_QUESTIONS, async {
            retry_async_with_config("user_questions.upsert", RetryConfig::default(), || async move {
                asked
                    .update_one(
                        doc! { "_id": asked_key(user_id, question_id) },
                        doc! { "$setOnInsert": {
                            "user_id": user_id,
                            "question_id": question_id,
                            "asked_at": asked_at,
                        } },
                    )
                    .upsert(true)
                    .await
            })
            .await
            .context("Failed to record asked question")
        })
        .await?;
        Ok(())
    }

    async fn asked_question_ids(&self, user_id: i64) -> Result<HashSet<i64>> {
        let asked = &self.asked;
        let docs: Vec<AskedDocument> = track_store_operation("find", USER_QUESTIONS, async {
            retry_async_with_config("user_questions.find", RetryConfig::default(), || async move {
                asked
                    .find(doc! { "user_id": user_id })
                    .await?
                    .try_collect::<Vec<_>>()
                    .await
            })
            .await
            .context("Failed to query asked questions")
        })
        .await?;
        Ok(docs.into_iter().map(|d| d.question_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_round_trip_preserves_state() {
        let mut user = UserState::new(9);
        user.score = 410;
        user.streak = 3;
        user.max_streak = 7;
        user.total_correct = 12;
        user.total_answered = 20;
        user.current_difficulty = 6;
        user.last_answered_at = DateTime::from_timestamp_millis(1_700_000_000_123);
        user.streak_decayed_at = DateTime::from_timestamp_millis(1_700_086_400_123);

        let back = UserState::from(UserDocument::from(&user));
        assert_eq!(back, user);
    }

    #[test]
    fn sort_and_filter_use_stored_field_names() {
        let sort = descending_by(RankMetric::Streak);
        assert_eq!(sort.keys().collect::<Vec<_>>(), vec!["max_streak", "_id"]);
        let filter = greater_than(RankMetric::Score, 40);
        assert_eq!(filter.get_document("score").unwrap().get_i64("$gt").unwrap(), 40);
    }

    #[test]
    fn out_of_range_stored_values_are_clamped() {
        let mut doc = UserDocument::from(&UserState::new(1));
        doc.current_difficulty = 42;
        doc.streak = -4;

        let user = UserState::from(doc);
        assert_eq!(user.current_difficulty, MAX_DIFFICULTY);
        assert_eq!(user.streak, 0);
    }

    #[test]
    fn fresh_user_document_has_no_last_answer() {
        let doc = to_document(&UserDocument::from(&UserState::new(5))).unwrap();
        assert!(doc.contains_key("_id"));
        assert!(!doc.contains_key("last_answered_at"));
        assert!(!doc.contains_key("streak_decayed_at"));
        assert_eq!(doc.get_i64("score").unwrap(), 0);
    }
}
