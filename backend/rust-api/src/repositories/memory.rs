//! In-process implementations of every storage capability.
//!
//! Used by the `memory` storage backend and by tests. Each component has an
//! outage switch so failure paths can be exercised deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::{
    AskedStore, DuplicateGuard, FanoutSecondarySync, RankIndex, RateLimiter, SecondarySync,
    UserCache, UserStore,
};
use crate::config::Config;
use crate::models::leaderboard::{rank_in_order, RankMetric, RankedEntry};
use crate::models::user::UserState;

#[derive(Debug, Default)]
struct Outage(AtomicBool);

impl Outage {
    fn set(&self, down: bool) {
        self.0.store(down, Ordering::SeqCst);
    }

    fn check(&self, component: &str) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            bail!("{} unavailable", component);
        }
        Ok(())
    }
}

fn metric_value(user: &UserState, metric: RankMetric) -> i64 {
    match metric {
        RankMetric::Score => user.score,
        RankMetric::Streak => user.max_streak as i64,
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<i64, UserState>>,
    reads_down: Outage,
    writes_down: Outage,
    saves: AtomicUsize,
    streak_updates: AtomicUsize,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or overwrites a record without counting it as a save.
    pub async fn insert(&self, user: UserState) {
        self.users.write().await.insert(user.id, user);
    }

    pub fn fail_reads(&self, down: bool) {
        self.reads_down.set(down);
    }

    pub fn fail_writes(&self, down: bool) {
        self.writes_down.set(down);
    }

    /// Number of successful full-record writes.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn streak_update_count(&self) -> usize {
        self.streak_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_or_create(&self, user_id: i64) -> Result<UserState> {
        self.reads_down.check("user store")?;
        if let Some(user) = self.users.read().await.get(&user_id) {
            return Ok(user.clone());
        }
        self.writes_down.check("user store")?;
        let mut users = self.users.write().await;
        Ok(users
            .entry(user_id)
            .or_insert_with(|| UserState::new(user_id))
            .clone())
    }

    async fn find(&self, user_id: i64) -> Result<Option<UserState>> {
        self.reads_down.check("user store")?;
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn save(&self, user: &UserState) -> Result<()> {
        self.writes_down.check("user store")?;
        self.users.write().await.insert(user.id, user.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_streak(
        &self,
        user_id: i64,
        streak: u32,
        decayed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.writes_down.check("user store")?;
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.streak = streak;
            user.streak_decayed_at = Some(decayed_at);
        }
        self.streak_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn top_by(&self, metric: RankMetric, limit: usize) -> Result<Vec<UserState>> {
        self.reads_down.check("user store")?;
        let mut users: Vec<UserState> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| {
            metric_value(b, metric)
                .cmp(&metric_value(a, metric))
                .then(a.id.cmp(&b.id))
        });
        users.truncate(limit);
        Ok(users)
    }

    async fn count_above(&self, metric: RankMetric, value: i64) -> Result<u64> {
        self.reads_down.check("user store")?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| metric_value(u, metric) > value)
            .count() as u64)
    }

    async fn all_users(&self) -> Result<Vec<UserState>> {
        self.reads_down.check("user store")?;
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        self.reads_down.check("user store")
    }
}

#[derive(Default)]
pub struct MemoryAskedStore {
    asked: RwLock<HashMap<i64, HashSet<i64>>>,
    down: Outage,
}

impl MemoryAskedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, down: bool) {
        self.down.set(down);
    }
}

#[async_trait]
impl AskedStore for MemoryAskedStore {
    async fn record_asked(&self, user_id: i64, question_id: i64) -> Result<()> {
        self.down.check("asked store")?;
        self.asked
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(question_id);
        Ok(())
    }

    async fn asked_question_ids(&self, user_id: i64) -> Result<HashSet<i64>> {
        self.down.check("asked store")?;
        Ok(self
            .asked
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct MemoryUserCache {
    entries: RwLock<HashMap<i64, (UserState, Instant)>>,
    ttl: Duration,
    down: Outage,
}

impl MemoryUserCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            down: Outage::default(),
        }
    }

    pub fn fail(&self, down: bool) {
        self.down.set(down);
    }

    /// Reads an entry regardless of the outage switch.
    pub async fn peek(&self, user_id: i64) -> Option<UserState> {
        let entries = self.entries.read().await;
        let (user, stored_at) = entries.get(&user_id)?;
        (stored_at.elapsed() < self.ttl).then(|| user.clone())
    }

    /// Drops every entry, as an eviction or restart would.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl UserCache for MemoryUserCache {
    async fn get(&self, user_id: i64) -> Result<Option<UserState>> {
        self.down.check("user cache")?;
        Ok(self.peek(user_id).await)
    }

    async fn set(&self, user: &UserState) -> Result<()> {
        self.down.check("user cache")?;
        self.entries
            .write()
            .await
            .insert(user.id, (user.clone(), Instant::now()));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.down.check("user cache")
    }
}

pub struct MemoryDuplicateGuard {
    markers: RwLock<HashMap<i64, (i64, Instant)>>,
    ttl: Duration,
    down: Outage,
}

impl MemoryDuplicateGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            markers: RwLock::new(HashMap::new()),
            ttl,
            down: Outage::default(),
        }
    }

    pub fn fail(&self, down: bool) {
        self.down.set(down);
    }
}

#[async_trait]
impl DuplicateGuard for MemoryDuplicateGuard {
    async fn last_answered(&self, user_id: i64) -> Result<Option<i64>> {
        self.down.check("duplicate guard")?;
        let markers = self.markers.read().await;
        Ok(markers
            .get(&user_id)
            .filter(|(_, set_at)| set_at.elapsed() < self.ttl)
            .map(|(question_id, _)| *question_id))
    }

    async fn mark_answered(&self, user_id: i64, question_id: i64) -> Result<()> {
        self.down.check("duplicate guard")?;
        self.markers
            .write()
            .await
            .insert(user_id, (question_id, Instant::now()));
        Ok(())
    }
}

/// Two sorted orderings kept as plain maps and sorted on read.
#[derive(Default)]
pub struct MemoryRankIndex {
    values: RwLock<HashMap<RankMetric, HashMap<i64, i64>>>,
    down: Outage,
}

impl MemoryRankIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, down: bool) {
        self.down.set(down);
    }

    /// Drops every entry, as after a cache flush.
    pub async fn clear(&self) {
        self.values.write().await.clear();
    }
}

#[async_trait]
impl RankIndex for MemoryRankIndex {
    async fn top(&self, metric: RankMetric, limit: usize) -> Result<Vec<RankedEntry>> {
        self.down.check("rank index")?;
        let values = self.values.read().await;
        let mut pairs: Vec<(i64, i64)> = values
            .get(&metric)
            .map(|m| m.iter().map(|(u, v)| (*u, *v)).collect())
            .unwrap_or_default();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        pairs.truncate(limit);
        Ok(rank_in_order(pairs))
    }

    async fn rank_of(&self, metric: RankMetric, user_id: i64) -> Result<Option<u64>> {
        self.down.check("rank index")?;
        let values = self.values.read().await;
        let Some(ordering) = values.get(&metric) else {
            return Ok(None);
        };
        let Some(own) = ordering.get(&user_id) else {
            return Ok(None);
        };
        let above = ordering.values().filter(|v| **v > *own).count() as u64;
        Ok(Some(above + 1))
    }

    async fn upsert(&self, metric: RankMetric, user_id: i64, value: i64) -> Result<()> {
        self.down.check("rank index")?;
        self.values
            .write()
            .await
            .entry(metric)
            .or_default()
            .insert(user_id, value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, (Instant, u32)>>,
    limit: u32,
    window: Duration,
    down: Outage,
}

impl MemoryRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
            down: Outage::default(),
        }
    }

    pub fn fail(&self, down: bool) {
        self.down.set(down);
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str) -> Result<bool> {
        self.down.check("rate limiter")?;
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let slot = windows.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(slot.0) >= self.window {
            *slot = (now, 0);
        }
        if slot.1 >= self.limit {
            return Ok(false);
        }
        slot.1 += 1;
        Ok(true)
    }
}

/// Concrete handles to a full in-memory wiring, so tests can flip outages and inspect state.
#[derive(Clone)]
pub struct MemoryBackends {
    pub store: Arc<MemoryUserStore>,
    pub asked: Arc<MemoryAskedStore>,
    pub cache: Arc<MemoryUserCache>,
    pub guard: Arc<MemoryDuplicateGuard>,
    pub index: Arc<MemoryRankIndex>,
    pub rate_limiter: Arc<MemoryRateLimiter>,
}

impl MemoryBackends {
    pub fn new(config: &Config) -> Self {
        Self {
            store: Arc::new(MemoryUserStore::new()),
            asked: Arc::new(MemoryAskedStore::new()),
            cache: Arc::new(MemoryUserCache::new(config.quiz.user_cache_ttl())),
            guard: Arc::new(MemoryDuplicateGuard::new(config.quiz.duplicate_guard_ttl())),
            index: Arc::new(MemoryRankIndex::new()),
            rate_limiter: Arc::new(MemoryRateLimiter::new(
                config.rate_limit.requests_per_window,
                Duration::from_secs(config.rate_limit.window_secs),
            )),
        }
    }

    pub fn secondary_sync(&self) -> Arc<dyn SecondarySync> {
        Arc::new(FanoutSecondarySync::new(
            self.cache.clone(),
            self.index.clone(),
            self.guard.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::SecondaryTarget;

    #[tokio::test]
    async fn first_reference_creates_zeroed_user() {
        let store = MemoryUserStore::new();
        assert!(store.find(4).await.unwrap().is_none());

        let user = store.get_or_create(4).await.unwrap();
        assert_eq!(user, UserState::new(4));
        assert!(store.find(4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_counts_strictly_greater_values() {
        let store = MemoryUserStore::new();
        for (id, score) in [(1, 50), (2, 80), (3, 80), (4, 10)] {
            let mut user = UserState::new(id);
            user.score = score;
            store.insert(user).await;
        }

        assert_eq!(store.count_above(RankMetric::Score, 80).await.unwrap(), 0);
        assert_eq!(store.count_above(RankMetric::Score, 50).await.unwrap(), 2);

        let top = store.top_by(RankMetric::Score, 3).await.unwrap();
        let ids: Vec<i64> = top.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn guard_entries_expire() {
        let guard = MemoryDuplicateGuard::new(Duration::from_millis(30));
        guard.mark_answered(1, 9).await.unwrap();
        assert!(guard.is_duplicate(1, 9).await.unwrap());
        assert!(!guard.is_duplicate(1, 8).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(guard.last_answered(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = MemoryUserCache::new(Duration::from_millis(30));
        cache.set(&UserState::new(2)).await.unwrap();
        assert!(cache.get(2).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rank_index_distinguishes_absent_from_first() {
        let index = MemoryRankIndex::new();
        index.upsert(RankMetric::Score, 1, 100).await.unwrap();
        index.upsert(RankMetric::Score, 2, 40).await.unwrap();

        assert_eq!(index.rank_of(RankMetric::Score, 1).await.unwrap(), Some(1));
        assert_eq!(index.rank_of(RankMetric::Score, 2).await.unwrap(), Some(2));
        assert_eq!(index.rank_of(RankMetric::Score, 3).await.unwrap(), None);
        assert_eq!(index.rank_of(RankMetric::Streak, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn outage_switch_fails_calls() {
        let index = MemoryRankIndex::new();
        index.fail(true);
        assert!(index.top(RankMetric::Score, 10).await.is_err());
        index.fail(false);
        assert!(index.top(RankMetric::Score, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn asked_pairs_are_deduplicated() {
        let asked = MemoryAskedStore::new();
        asked.record_asked(1, 5).await.unwrap();
        asked.record_asked(1, 5).await.unwrap();
        asked.record_asked(1, 6).await.unwrap();
        assert_eq!(asked.asked_question_ids(1).await.unwrap().len(), 2);
        assert!(asked.asked_question_ids(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_budget() {
        let limiter = MemoryRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allow("user:1").await.unwrap());
        assert!(limiter.allow("user:1").await.unwrap());
        assert!(!limiter.allow("user:1").await.unwrap());
        assert!(limiter.allow("user:2").await.unwrap());
    }

    #[tokio::test]
    async fn fanout_reports_only_failed_targets() {
        let backends = MemoryBackends::new(&Config::default());
        backends.index.fail(true);

        let mut user = UserState::new(8);
        user.score = 30;
        let report = backends.secondary_sync().propagate(&user, 3).await;

        assert!(report.failed(SecondaryTarget::ScoreIndex));
        assert!(report.failed(SecondaryTarget::StreakIndex));
        assert!(!report.failed(SecondaryTarget::Cache));
        assert!(backends.cache.peek(8).await.is_some());
        assert_eq!(backends.guard.last_answered(8).await.unwrap(), Some(3));
    }
}
