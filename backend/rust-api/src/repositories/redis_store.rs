//! Redis-backed secondary state: user cache, duplicate guard, rank index and
//! request limiter. None of this is authoritative.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{
    DuplicateGuard, PropagationReport, RankIndex, RateLimiter, SecondarySync, UserCache,
};
use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::leaderboard::{rank_in_order, RankMetric, RankedEntry};
use crate::models::user::UserState;

fn user_info_key(user_id: i64) -> String {
    format!("user:info:{}", user_id)
}

fn last_answer_key(user_id: i64) -> String {
    format!("user:last_answer:{}", user_id)
}

fn leaderboard_key(metric: RankMetric) -> &'static str {
    match metric {
        RankMetric::Score => "leaderboard:score",
        RankMetric::Streak => "leaderboard:streak",
    }
}

pub struct RedisUserCache {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisUserCache {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    async fn get(&self, user_id: i64) -> Result<Option<UserState>> {
        let mut conn = self.redis.clone();
        let cached: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(user_info_key(user_id))
                .query_async(&mut conn)
                .await
                .context("Failed to read cached user")
        })
        .await?;

        match cached {
            Some(json) => match serde_json::from_str::<UserState>(&json) {
                Ok(user) => {
                    record_cache_hit();
                    Ok(Some(user))
                }
                Err(e) => {
                    // unreadable entries are treated as absent and get overwritten on next set
                    tracing::warn!(user_id, error = %e, "Discarding malformed cached user");
                    record_cache_miss();
                    Ok(None)
                }
            },
            None => {
                record_cache_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, user: &UserState) -> Result<()> {
        let json = serde_json::to_string(user).context("Failed to encode user for cache")?;
        let mut conn = self.redis.clone();
        track_cache_operation("set", async {
            redis::cmd("SET")
                .arg(user_info_key(user.id))
                .arg(json)
                .arg("EX")
                .arg(self.ttl.as_secs().max(1))
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to cache user")
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis ping failed")?;
        Ok(())
    }
}

pub struct RedisDuplicateGuard {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisDuplicateGuard {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl DuplicateGuard for RedisDuplicateGuard {
    async fn last_answered(&self, user_id: i64) -> Result<Option<i64>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = track_cache_operation("get_last_answer", async {
            redis::cmd("GET")
                .arg(last_answer_key(user_id))
                .query_async(&mut conn)
                .await
                .context("Failed to read last answer")
        })
        .await?;
        Ok(raw.and_then(|v| v.parse::<i64>().ok()))
    }

    async fn mark_answered(&self, user_id: i64, question_id: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("set_last_answer", async {
            redis::cmd("SET")
                .arg(last_answer_key(user_id))
                .arg(question_id)
                .arg("EX")
                .arg(self.ttl.as_secs().max(1))
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to write last answer")
        })
        .await
    }
}

/// `1 + ZCOUNT(value, +inf)` for the member's own value, or -1 when it is absent.
/// Done server-side so the read and the count see the same ordering.
const RANK_OF_SCRIPT: &str = r#"
    local value = redis.call('ZSCORE', KEYS[1], ARGV[1])
    if not value then
        return -1
    end
    return redis.call('ZCOUNT', KEYS[1], '(' .. value, '+inf') + 1
"#;

fn rank_from_reply(reply: i64) -> Option<u64> {
    u64::try_from(reply).ok().filter(|rank| *rank > 0)
}

/// Redis orders equal scores by member in reverse; put ties back in ascending id order.
fn entries_from_members(members: Vec<(String, f64)>) -> Result<Vec<RankedEntry>> {
    let mut pairs = Vec::with_capacity(members.len());
    for (member, value) in members {
        let user_id = member
            .parse::<i64>()
            .with_context(|| format!("Invalid leaderboard member {:?}", member))?;
        pairs.push((user_id, value as i64));
    }
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    Ok(rank_in_order(pairs))
}

pub struct RedisRankIndex {
    redis: ConnectionManager,
}

impl RedisRankIndex {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl RankIndex for RedisRankIndex {
    async fn top(&self, metric: RankMetric, limit: usize) -> Result<Vec<RankedEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let members: Vec<(String, f64)> = track_cache_operation("zrevrange", async {
            redis::cmd("ZREVRANGE")
                .arg(leaderboard_key(metric))
                .arg(0)
                .arg(limit as i64 - 1)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
                .context("Failed to read leaderboard")
        })
        .await?;

        entries_from_members(members)
    }

    async fn rank_of(&self, metric: RankMetric, user_id: i64) -> Result<Option<u64>> {
        let mut conn = self.redis.clone();
        let reply: i64 = track_cache_operation("rank_of", async {
            redis::Script::new(RANK_OF_SCRIPT)
                .key(leaderboard_key(metric))
                .arg(user_id)
                .invoke_async(&mut conn)
                .await
                .context("Failed to read leaderboard rank")
        })
        .await?;
        Ok(rank_from_reply(reply))
    }

    async fn upsert(&self, metric: RankMetric, user_id: i64, value: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("zadd", async {
            redis::cmd("ZADD")
                .arg(leaderboard_key(metric))
                .arg(value)
                .arg(user_id)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to update leaderboard")
        })
        .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// All four secondary writes in one pipelined round trip. Redis either
/// takes the batch or the connection fails, so failures are reported for
/// every target at once.
pub struct RedisSecondarySync {
    redis: ConnectionManager,
    cache_ttl: Duration,
    guard_ttl: Duration,
}

impl RedisSecondarySync {
    pub fn new(redis: ConnectionManager, cache_ttl: Duration, guard_ttl: Duration) -> Self {
        Self {
            redis,
            cache_ttl,
            guard_ttl,
        }
    }
}

#[async_trait]
impl SecondarySync for RedisSecondarySync {
    async fn propagate(&self, user: &UserState, question_id: i64) -> PropagationReport {
        let json = match serde_json::to_string(user) {
            Ok(json) => json,
            Err(e) => return PropagationReport::all_failed(format!("encode user: {}", e)),
        };

        let mut pipe = redis::pipe();
        pipe.cmd("SET")
            .arg(user_info_key(user.id))
            .arg(json)
            .arg("EX")
            .arg(self.cache_ttl.as_secs().max(1))
            .ignore()
            .cmd("ZADD")
            .arg(leaderboard_key(RankMetric::Score))
            .arg(user.score)
            .arg(user.id)
            .ignore()
            .cmd("ZADD")
            .arg(leaderboard_key(RankMetric::Streak))
            .arg(user.max_streak)
            .arg(user.id)
            .ignore()
            .cmd("SET")
            .arg(last_answer_key(user.id))
            .arg(question_id)
            .arg("EX")
            .arg(self.guard_ttl.as_secs().max(1))
            .ignore();

        let mut conn = self.redis.clone();
        let result = track_cache_operation("pipeline", async {
            pipe.query_async::<()>(&mut conn)
                .await
                .context("Secondary pipeline failed")
        })
        .await;

        match result {
            Ok(()) => PropagationReport::default(),
            Err(e) => PropagationReport::all_failed(format!("{:#}", e)),
        }
    }
}

/// Fixed window counter kept in one Redis key per caller.
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    limit: u32,
    window_secs: u64,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, limit: u32, window_secs: u64) -> Self {
        Self {
            redis,
            limit,
            window_secs,
        }
    }
}

const FIXED_WINDOW_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let allowed: u32 = redis::Script::new(FIXED_WINDOW_SCRIPT)
            .key(format!("ratelimit:{}", key))
            .arg(self.limit)
            .arg(self.window_secs)
            .invoke_async(&mut conn)
            .await
            .context("Rate limit script failed")?;
        Ok(allowed == 1)
    }
}
