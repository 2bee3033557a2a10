use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hard cap on leaderboard page size.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    /// Ordered by total score
    Score,
    /// Ordered by max streak
    Streak,
}

impl RankMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMetric::Score => "score",
            RankMetric::Streak => "streak",
        }
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "score" => Ok(RankMetric::Score),
            "streak" => Ok(RankMetric::Streak),
            other => Err(format!("unknown rank metric: {}", other)),
        }
    }
}

/// One row of a top-N listing; `rank` is 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedEntry {
    pub user_id: i64,
    pub value: i64,
    pub rank: u64,
}

/// Ranks (user, value) pairs that are already in descending order, starting from the
/// top of the ordering. Equal values share the better rank, so a listed rank always
/// equals `1 + count(strictly greater)` as reported by a single-user lookup.
pub fn rank_in_order(pairs: impl IntoIterator<Item = (i64, i64)>) -> Vec<RankedEntry> {
    let mut ranked: Vec<RankedEntry> = Vec::new();
    for (position, (user_id, value)) in pairs.into_iter().enumerate() {
        let rank = match ranked.last() {
            Some(prev) if prev.value == value => prev.rank,
            _ => position as u64 + 1,
        };
        ranked.push(RankedEntry {
            user_id,
            value,
            rank,
        });
    }
    ranked
}

/// Clamps a requested page size: missing or non-positive means the default, anything
/// above the cap is cut down to it.
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => (n as usize).min(MAX_LEADERBOARD_LIMIT),
        _ => DEFAULT_LEADERBOARD_LIMIT,
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreLeaderboardEntry {
    pub user_id: i64,
    pub score: i64,
    pub rank: u64,
}

impl From<RankedEntry> for ScoreLeaderboardEntry {
    fn from(entry: RankedEntry) -> Self {
        Self {
            user_id: entry.user_id,
            score: entry.value,
            rank: entry.rank,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakLeaderboardEntry {
    pub user_id: i64,
    pub streak: i64,
    pub rank: u64,
}

impl From<RankedEntry> for StreakLeaderboardEntry {
    fn from(entry: RankedEntry) -> Self {
        Self {
            user_id: entry.user_id,
            streak: entry.value,
            rank: entry.rank,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankQuery {
    pub user_id: i64,
    pub metric: Option<RankMetric>,
}

/// `rank` is 0 when the user has no standing yet.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankResponse {
    pub user_id: i64,
    pub metric: RankMetric,
    pub rank: u64,
}
