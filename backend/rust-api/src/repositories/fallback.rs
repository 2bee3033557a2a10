use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::RankIndex;
use crate::metrics::RANK_INDEX_FALLBACKS_TOTAL;
use crate::models::leaderboard::{RankMetric, RankedEntry};

/// Serves rank queries from a fast index and falls back to a second strategy
/// (normally the store scan) when the index errors or has nothing for the query.
pub struct FallbackRankIndex {
    primary: Arc<dyn RankIndex>,
    fallback: Arc<dyn RankIndex>,
}

impl FallbackRankIndex {
    pub fn new(primary: Arc<dyn RankIndex>, fallback: Arc<dyn RankIndex>) -> Self {
        Self { primary, fallback }
    }

    fn note_fallback(&self, metric: RankMetric, reason: &str) {
        RANK_INDEX_FALLBACKS_TOTAL
            .with_label_values(&[metric.as_str()])
            .inc();
        tracing::debug!(
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            %metric,
            reason,
            "rank query served by fallback"
        );
    }
}

#[async_trait]
impl RankIndex for FallbackRankIndex {
    async fn top(&self, metric: RankMetric, limit: usize) -> Result<Vec<RankedEntry>> {
        match self.primary.top(metric, limit).await {
            Ok(entries) if !entries.is_empty() => Ok(entries),
            Ok(_) => {
                self.note_fallback(metric, "empty index");
                self.fallback.top(metric, limit).await
            }
            Err(e) => {
                tracing::warn!(error = %e, %metric, "rank index top-N read failed");
                self.note_fallback(metric, "index error");
                self.fallback.top(metric, limit).await
            }
        }
    }

    async fn rank_of(&self, metric: RankMetric, user_id: i64) -> Result<Option<u64>> {
        match self.primary.rank_of(metric, user_id).await {
            Ok(Some(rank)) => Ok(Some(rank)),
            Ok(None) => {
                self.note_fallback(metric, "not in index");
                self.fallback.rank_of(metric, user_id).await
            }
            Err(e) => {
                tracing::warn!(error = %e, %metric, user_id, "rank index lookup failed");
                self.note_fallback(metric, "index error");
                self.fallback.rank_of(metric, user_id).await
            }
        }
    }

    async fn upsert(&self, metric: RankMetric, user_id: i64, value: i64) -> Result<()> {
        self.primary.upsert(metric, user_id, value).await
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
