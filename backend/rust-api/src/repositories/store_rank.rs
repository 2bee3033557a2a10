use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{RankIndex, UserStore};
use crate::models::leaderboard::{rank_in_order, RankMetric, RankedEntry};
use crate::models::user::UserState;

/// Rank answers computed straight from the store of record.
///
/// Slower than a sorted index but always agrees with the stored values:
/// rank = 1 + number of users with a strictly greater value.
pub struct StoreRankIndex {
    store: Arc<dyn UserStore>,
}

impl StoreRankIndex {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

fn value_of(user: &UserState, metric: RankMetric) -> i64 {
    match metric {
        RankMetric::Score => user.score,
        RankMetric::Streak => user.max_streak as i64,
    }
}

#[async_trait]
impl RankIndex for StoreRankIndex {
    async fn top(&self, metric: RankMetric, limit: usize) -> Result<Vec<RankedEntry>> {
        let users = self.store.top_by(metric, limit).await?;
        Ok(rank_in_order(
            users.iter().map(|u| (u.id, value_of(u, metric))),
        ))
    }

    async fn rank_of(&self, metric: RankMetric, user_id: i64) -> Result<Option<u64>> {
        let Some(user) = self.store.find(user_id).await? else {
            return Ok(None);
        };
        let above = self.store.count_above(metric, value_of(&user, metric)).await?;
        Ok(Some(above + 1))
    }

    /// The store already holds the value.
    async fn upsert(&self, _metric: RankMetric, _user_id: i64, _value: i64) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryUserStore;

    async fn seeded() -> Arc<MemoryUserStore> {
        let store = Arc::new(MemoryUserStore::new());
        for (id, score, max_streak) in [(1, 300, 2), (2, 120, 9), (3, 300, 4)] {
            let mut user = UserState::new(id);
            user.score = score;
            user.max_streak = max_streak;
            store.insert(user).await;
        }
        store
    }

    #[tokio::test]
    async fn ties_share_the_better_rank() {
        let index = StoreRankIndex::new(seeded().await);
        assert_eq!(index.rank_of(RankMetric::Score, 1).await.unwrap(), Some(1));
        assert_eq!(index.rank_of(RankMetric::Score, 3).await.unwrap(), Some(1));
        assert_eq!(index.rank_of(RankMetric::Score, 2).await.unwrap(), Some(3));
        assert_eq!(index.rank_of(RankMetric::Streak, 2).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn unknown_user_is_unranked() {
        let index = StoreRankIndex::new(seeded().await);
        assert_eq!(index.rank_of(RankMetric::Score, 42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn top_reads_store_order() {
        let index = StoreRankIndex::new(seeded().await);
        let top = index.top(RankMetric::Streak, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].user_id, top[0].value, top[0].rank), (2, 9, 1));
        assert_eq!((top[1].user_id, top[1].value, top[1].rank), (3, 4, 2));
    }

    #[tokio::test]
    async fn listed_ranks_match_single_lookups() {
        let index = StoreRankIndex::new(seeded().await);
        for entry in index.top(RankMetric::Score, 10).await.unwrap() {
            let single = index.rank_of(RankMetric::Score, entry.user_id).await.unwrap();
            assert_eq!(Some(entry.rank), single, "user {}", entry.user_id);
        }
    }
}
