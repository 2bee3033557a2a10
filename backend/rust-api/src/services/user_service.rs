use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::progression;
use crate::error::QuizResult;
use crate::metrics::STREAK_DECAYS_TOTAL;
use crate::models::user::{UserMetricsResponse, UserState};
use crate::repositories::{UserCache, UserStore};

/// Cache-aside reads of player state with lazy streak decay.
pub struct UserService {
    store: Arc<dyn UserStore>,
    cache: Arc<dyn UserCache>,
    decay_window: chrono::Duration,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Arc<dyn UserCache>,
        decay_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            cache,
            decay_window,
        }
    }

    /// Current state with decay applied and persisted. Unknown ids get a zeroed record.
    pub async fn get_user_state(&self, user_id: i64) -> QuizResult<UserState> {
        let user = self.load(user_id).await?;
        self.settle_decay(user, Utc::now()).await
    }

    pub async fn get_user_metrics(&self, user_id: i64) -> QuizResult<UserMetricsResponse> {
        let user = self.get_user_state(user_id).await?;
        Ok(UserMetricsResponse::from(&user))
    }

    /// Raw state before decay: cache first, store on miss or cache failure.
    pub(crate) async fn load(&self, user_id: i64) -> QuizResult<UserState> {
        match self.cache.get(user_id).await {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user_id, error = %e, "User cache read failed, using store");
            }
        }

        let user = self.store.get_or_create(user_id).await?;
        self.refresh_cache(&user).await;
        Ok(user)
    }

    /// Applies decay as of `now`. A changed streak goes to the store before
    /// anything else sees it; a store failure here is fatal to the caller.
    pub(crate) async fn settle_decay(
        &self,
        mut user: UserState,
        now: DateTime<Utc>,
    ) -> QuizResult<UserState> {
        let before = user.streak;
        if !progression::apply_streak_decay(&mut user, now, self.decay_window) {
            return Ok(user);
        }

        STREAK_DECAYS_TOTAL.inc();
        tracing::debug!(
            user_id = user.id,
            from = before,
            to = user.streak,
            "Streak decayed after inactivity"
        );

        let checkpoint = user.streak_decayed_at.unwrap_or(now);
        self.store
            .update_streak(user.id, user.streak, checkpoint)
            .await?;
        self.refresh_cache(&user).await;
        Ok(user)
    }

    async fn refresh_cache(&self, user: &UserState) {
        if let Err(e) = self.cache.set(user).await {
            tracing::warn!(user_id = user.id, error = %e, "Failed to refresh user cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::{MemoryUserCache, MemoryUserStore};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryUserStore>, Arc<MemoryUserCache>, UserService) {
        let store = Arc::new(MemoryUserStore::new());
        let cache = Arc::new(MemoryUserCache::new(Duration::from_secs(60)));
        let service = UserService::new(store.clone(), cache.clone(), chrono::Duration::hours(24));
        (store, cache, service)
    }

    #[tokio::test]
    async fn first_read_creates_and_caches() {
        let (store, cache, service) = setup();
        let user = service.get_user_state(11).await.unwrap();

        assert_eq!(user, UserState::new(11));
        assert!(store.find(11).await.unwrap().is_some());
        assert_eq!(cache.peek(11).await, Some(user));
    }

    #[tokio::test]
    async fn decay_is_persisted_before_returning() {
        let (store, cache, service) = setup();
        let mut user = UserState::new(4);
        user.streak = 5;
        user.max_streak = 5;
        user.last_answered_at = Some(Utc::now() - chrono::Duration::hours(50));
        store.insert(user).await;

        let read = service.get_user_state(4).await.unwrap();

        assert_eq!(read.streak, 3);
        assert_eq!(read.max_streak, 5);
        assert_eq!(store.find(4).await.unwrap().unwrap().streak, 3);
        assert_eq!(cache.peek(4).await.unwrap().streak, 3);
        assert_eq!(store.streak_update_count(), 1);
    }

    #[tokio::test]
    async fn repeated_reads_do_not_compound_decay() {
        let (store, cache, service) = setup();
        let mut user = UserState::new(5);
        user.streak = 5;
        user.max_streak = 5;
        user.last_answered_at = Some(Utc::now() - chrono::Duration::hours(50));
        store.insert(user).await;

        for _ in 0..3 {
            assert_eq!(service.get_user_state(5).await.unwrap().streak, 3);
        }
        assert_eq!(store.find(5).await.unwrap().unwrap().streak, 3);
        assert_eq!(cache.peek(5).await.unwrap().streak, 3);
        assert_eq!(store.streak_update_count(), 1);

        // a cold cache reads the checkpoint back from the store
        cache.clear().await;
        assert_eq!(service.get_user_state(5).await.unwrap().streak, 3);
        assert_eq!(store.streak_update_count(), 1);
    }

    #[tokio::test]
    async fn stale_cache_entry_still_decays() {
        let (store, cache, service) = setup();
        let mut user = UserState::new(6);
        user.streak = 2;
        user.max_streak = 2;
        user.last_answered_at = Some(Utc::now() - chrono::Duration::hours(30));
        store.insert(user.clone()).await;
        cache.set(&user).await.unwrap();

        assert_eq!(service.get_user_state(6).await.unwrap().streak, 1);
        assert_eq!(store.find(6).await.unwrap().unwrap().streak, 1);
    }

    #[tokio::test]
    async fn cache_outage_reads_through_to_store() {
        let (store, cache, service) = setup();
        let mut user = UserState::new(2);
        user.score = 80;
        store.insert(user).await;
        cache.fail(true);

        assert_eq!(service.get_user_state(2).await.unwrap().score, 80);
    }

    #[tokio::test]
    async fn store_outage_on_decay_write_is_fatal() {
        let (store, _, service) = setup();
        let mut user = UserState::new(3);
        user.streak = 4;
        user.max_streak = 4;
        user.last_answered_at = Some(Utc::now() - chrono::Duration::hours(48));
        store.insert(user).await;
        store.fail_writes(true);

        assert!(service.get_user_state(3).await.is_err());
    }

    #[tokio::test]
    async fn metrics_report_accuracy_as_percentage() {
        let (store, _, service) = setup();
        let mut user = UserState::new(8);
        user.total_answered = 4;
        user.total_correct = 3;
        store.insert(user).await;

        let metrics = service.get_user_metrics(8).await.unwrap();
        assert_eq!(metrics.accuracy, 75.0);
        assert_eq!(metrics.total_answered, 4);
    }
}
