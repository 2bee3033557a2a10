use std::sync::Arc;

use crate::error::QuizResult;
use crate::models::leaderboard::{
    clamp_limit, RankMetric, RankedEntry, ScoreLeaderboardEntry, StreakLeaderboardEntry,
};
use crate::repositories::{RankIndex, UserStore};

/// Leaderboard reads. `ranks` is expected to fall back to the store on its own
/// (see `FallbackRankIndex`), so callers never learn which path answered.
pub struct LeaderboardService {
    store: Arc<dyn UserStore>,
    index: Arc<dyn RankIndex>,
    ranks: Arc<dyn RankIndex>,
}

impl LeaderboardService {
    /// `index` is the raw rank index (rebuilt on demand); `ranks` serves queries.
    pub fn new(
        store: Arc<dyn UserStore>,
        index: Arc<dyn RankIndex>,
        ranks: Arc<dyn RankIndex>,
    ) -> Self {
        Self {
            store,
            index,
            ranks,
        }
    }

    pub async fn top(&self, metric: RankMetric, limit: Option<i64>) -> QuizResult<Vec<RankedEntry>> {
        Ok(self.ranks.top(metric, clamp_limit(limit)).await?)
    }

    pub async fn top_by_score(&self, limit: Option<i64>) -> QuizResult<Vec<ScoreLeaderboardEntry>> {
        let entries = self.top(RankMetric::Score, limit).await?;
        Ok(entries.into_iter().map(ScoreLeaderboardEntry::from).collect())
    }

    pub async fn top_by_streak(&self, limit: Option<i64>) -> QuizResult<Vec<StreakLeaderboardEntry>> {
        let entries = self.top(RankMetric::Streak, limit).await?;
        Ok(entries.into_iter().map(StreakLeaderboardEntry::from).collect())
    }

    /// 1-indexed rank, `None` when the user is unknown everywhere.
    pub async fn get_rank(&self, user_id: i64, metric: RankMetric) -> QuizResult<Option<u64>> {
        Ok(self.ranks.rank_of(metric, user_id).await?)
    }

    /// Both ranks at once, for the answer response. Lookup failures count as unranked.
    pub async fn ranks_for(&self, user_id: i64) -> (Option<u64>, Option<u64>) {
        let (score, streak) = tokio::join!(
            self.get_rank(user_id, RankMetric::Score),
            self.get_rank(user_id, RankMetric::Streak),
        );
        let settle = |metric: RankMetric, rank: QuizResult<Option<u64>>| match rank {
            Ok(rank) => rank,
            Err(e) => {
                tracing::warn!(user_id, %metric, error = %e, "Rank lookup failed");
                None
            }
        };
        (
            settle(RankMetric::Score, score),
            settle(RankMetric::Streak, streak),
        )
    }

    /// Re-upserts every stored user into both orderings. Returns how many users were indexed.
    pub async fn rebuild_index(&self) -> QuizResult<usize> {
        let users = self.store.all_users().await?;
        for user in &users {
            self.index
                .upsert(RankMetric::Score, user.id, user.score)
                .await?;
            self.index
                .upsert(RankMetric::Streak, user.id, user.max_streak as i64)
                .await?;
        }
        tracing::info!(
            users = users.len(),
            index = self.index.name(),
            "Rank index rebuilt from store"
        );
        Ok(users.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserState;
    use crate::repositories::fallback::FallbackRankIndex;
    use crate::repositories::memory::{MemoryRankIndex, MemoryUserStore};
    use crate::repositories::store_rank::StoreRankIndex;

    async fn setup() -> (Arc<MemoryRankIndex>, LeaderboardService) {
        let store = Arc::new(MemoryUserStore::new());
        for (id, score, max_streak) in [(1, 50, 1), (2, 500, 3), (3, 200, 8)] {
            let mut user = UserState::new(id);
            user.score = score;
            user.max_streak = max_streak;
            store.insert(user).await;
        }
        let index = Arc::new(MemoryRankIndex::new());
        let ranks = Arc::new(FallbackRankIndex::new(
            index.clone(),
            Arc::new(StoreRankIndex::new(store.clone())),
        ));
        (index.clone(), LeaderboardService::new(store, index, ranks))
    }

    #[tokio::test]
    async fn rebuild_fills_both_orderings() {
        let (index, leaderboard) = setup().await;
        assert_eq!(leaderboard.rebuild_index().await.unwrap(), 3);

        assert_eq!(index.rank_of(RankMetric::Score, 2).await.unwrap(), Some(1));
        assert_eq!(index.rank_of(RankMetric::Streak, 3).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn listing_is_capped_and_mapped() {
        let (_, leaderboard) = setup().await;
        let top = leaderboard.top_by_score(Some(1000)).await.unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].user_id, 2);
        assert_eq!(top[0].score, 500);

        let streaks = leaderboard.top_by_streak(Some(1)).await.unwrap();
        assert_eq!(streaks.len(), 1);
        assert_eq!((streaks[0].user_id, streaks[0].streak, streaks[0].rank), (3, 8, 1));
    }

    #[tokio::test]
    async fn ranks_for_unknown_user_are_unranked() {
        let (_, leaderboard) = setup().await;
        assert_eq!(leaderboard.ranks_for(99).await, (None, None));
        assert_eq!(leaderboard.ranks_for(3).await, (Some(2), Some(1)));
    }
}
