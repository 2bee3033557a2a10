//! Storage capabilities used by the quiz services.
//!
//! The store of record (`UserStore`, `AskedStore`) is authoritative. Everything else
//! (`UserCache`, `DuplicateGuard`, `RankIndex`) is derived state that may be lost or
//! stale and is rebuilt from the store when needed.

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::leaderboard::{RankMetric, RankedEntry};
use crate::models::user::UserState;

pub mod fallback;
pub mod memory;
pub mod mongo;
pub mod redis_store;
pub mod store_rank;

/// Durable record of each player's progression.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Loads the user, creating a zeroed record on first reference.
    async fn get_or_create(&self, user_id: i64) -> Result<UserState>;

    /// Loads the user without creating it.
    async fn find(&self, user_id: i64) -> Result<Option<UserState>>;

    /// Writes the whole record (last writer wins).
    async fn save(&self, user: &UserState) -> Result<()>;

    /// Writes only the streak and its decay checkpoint, used when lazy decay changes
    /// it on read.
    async fn update_streak(
        &self,
        user_id: i64,
        streak: u32,
        decayed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Top `limit` users ordered by `metric` descending, ties by ascending id.
    async fn top_by(&self, metric: RankMetric, limit: usize) -> Result<Vec<UserState>>;

    /// Number of users whose `metric` value is strictly greater than `value`.
    async fn count_above(&self, metric: RankMetric, value: i64) -> Result<u64>;

    /// Every stored user, for rebuilding derived state.
    async fn all_users(&self) -> Result<Vec<UserState>>;

    async fn ping(&self) -> Result<()>;
}

/// (user, question) pairs already shown to a player.
#[async_trait]
pub trait AskedStore: Send + Sync {
    /// Records a pair; recording the same pair twice is a no-op.
    async fn record_asked(&self, user_id: i64, question_id: i64) -> Result<()>;

    async fn asked_question_ids(&self, user_id: i64) -> Result<HashSet<i64>>;
}

/// TTL-bounded copy of user records in front of the store.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<UserState>>;

    async fn set(&self, user: &UserState) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Short-lived marker of the last accepted question per user.
#[async_trait]
pub trait DuplicateGuard: Send + Sync {
    async fn last_answered(&self, user_id: i64) -> Result<Option<i64>>;

    async fn mark_answered(&self, user_id: i64, question_id: i64) -> Result<()>;

    async fn is_duplicate(&self, user_id: i64, question_id: i64) -> Result<bool> {
        Ok(self.last_answered(user_id).await? == Some(question_id))
    }
}

/// Sorted orderings of users by score and by max streak.
#[async_trait]
pub trait RankIndex: Send + Sync {
    /// At most `limit` entries, highest value first, ranks starting at 1.
    async fn top(&self, metric: RankMetric, limit: usize) -> Result<Vec<RankedEntry>>;

    /// 1-indexed rank, `None` when the user has no entry.
    async fn rank_of(&self, metric: RankMetric, user_id: i64) -> Result<Option<u64>>;

    async fn upsert(&self, metric: RankMetric, user_id: i64, value: i64) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Secondary structures refreshed after a successful store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecondaryTarget {
    Cache,
    ScoreIndex,
    StreakIndex,
    DuplicateGuard,
}

impl SecondaryTarget {
    pub const ALL: [SecondaryTarget; 4] = [
        SecondaryTarget::Cache,
        SecondaryTarget::ScoreIndex,
        SecondaryTarget::StreakIndex,
        SecondaryTarget::DuplicateGuard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecondaryTarget::Cache => "cache",
            SecondaryTarget::ScoreIndex => "score_index",
            SecondaryTarget::StreakIndex => "streak_index",
            SecondaryTarget::DuplicateGuard => "duplicate_guard",
        }
    }
}

impl fmt::Display for SecondaryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which secondary writes failed during one propagation, and why.
#[derive(Debug, Default)]
pub struct PropagationReport {
    pub failures: Vec<(SecondaryTarget, String)>,
}

impl PropagationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, target: SecondaryTarget) -> bool {
        self.failures.iter().any(|(t, _)| *t == target)
    }

    pub fn record(&mut self, target: SecondaryTarget, result: Result<()>) {
        if let Err(e) = result {
            self.failures.push((target, format!("{:#}", e)));
        }
    }

    /// Every target failed for the same reason (one shared round trip went down).
    pub fn all_failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            failures: SecondaryTarget::ALL
                .iter()
                .map(|t| (*t, reason.clone()))
                .collect(),
        }
    }
}

/// Pushes a freshly stored user to cache, rank index and duplicate guard in one batch.
#[async_trait]
pub trait SecondarySync: Send + Sync {
    async fn propagate(&self, user: &UserState, question_id: i64) -> PropagationReport;
}

/// Fixed-window request counter.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one request against `key`; false once the window's budget is spent.
    async fn allow(&self, key: &str) -> Result<bool>;
}

/// Runs the four secondary writes against independent components, concurrently.
pub struct FanoutSecondarySync {
    cache: std::sync::Arc<dyn UserCache>,
    index: std::sync::Arc<dyn RankIndex>,
    guard: std::sync::Arc<dyn DuplicateGuard>,
}

impl FanoutSecondarySync {
    pub fn new(
        cache: std::sync::Arc<dyn UserCache>,
        index: std::sync::Arc<dyn RankIndex>,
        guard: std::sync::Arc<dyn DuplicateGuard>,
    ) -> Self {
        Self {
            cache,
            index,
            guard,
        }
    }
}

#[async_trait]
impl SecondarySync for FanoutSecondarySync {
    async fn propagate(&self, user: &UserState, question_id: i64) -> PropagationReport {
        let (cache, score, streak, guard) = tokio::join!(
            self.cache.set(user),
            self.index.upsert(RankMetric::Score, user.id, user.score),
            self.index
                .upsert(RankMetric::Streak, user.id, user.max_streak as i64),
            self.guard.mark_answered(user.id, question_id),
        );

        let mut report = PropagationReport::default();
        report.record(SecondaryTarget::Cache, cache);
        report.record(SecondaryTarget::ScoreIndex, score);
        report.record(SecondaryTarget::StreakIndex, streak);
        report.record(SecondaryTarget::DuplicateGuard, guard);
        report
    }
}
