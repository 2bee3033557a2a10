use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use redis::aio::ConnectionManager;

use crate::config::{Config, StorageBackend};
use crate::questions::{CatalogQuestionProvider, QuestionCatalog, QuestionProvider};
use crate::repositories::fallback::FallbackRankIndex;
use crate::repositories::memory::MemoryBackends;
use crate::repositories::mongo::{MongoAskedStore, MongoUserStore};
use crate::repositories::redis_store::{
    RedisDuplicateGuard, RedisRankIndex, RedisRateLimiter, RedisSecondarySync, RedisUserCache,
};
use crate::repositories::store_rank::StoreRankIndex;
use crate::repositories::{
    AskedStore, DuplicateGuard, RankIndex, RateLimiter, SecondarySync, UserCache, UserStore,
};

pub mod answer_service;
pub mod leaderboard_service;
pub mod progression;
pub mod question_service;
pub mod user_service;

use answer_service::AnswerService;
use leaderboard_service::LeaderboardService;
use question_service::QuestionService;
use user_service::UserService;

/// One implementation per storage capability.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn UserStore>,
    pub asked: Arc<dyn AskedStore>,
    pub cache: Arc<dyn UserCache>,
    pub guard: Arc<dyn DuplicateGuard>,
    pub index: Arc<dyn RankIndex>,
    pub secondary: Arc<dyn SecondarySync>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl Backends {
    /// Picks the backend named in the configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.storage_backend {
            StorageBackend::External => Self::connect(config).await,
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; state is lost on restart");
                Ok(Self::from(&MemoryBackends::new(config)))
            }
        }
    }

    /// MongoDB as the store of record, Redis for everything derived.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
            .await
            .context("Failed to connect to MongoDB")?;
        let db = mongo_client.database(&config.mongo_database);
        tracing::info!("MongoDB connected");

        let store = MongoUserStore::new(db.clone());
        let asked = MongoAskedStore::new(&db);
        if let Err(e) = store.ensure_indexes().await {
            tracing::warn!(error = %e, "Could not ensure user indexes");
        }
        if let Err(e) = asked.ensure_indexes().await {
            tracing::warn!(error = %e, "Could not ensure user_questions indexes");
        }

        let redis_client =
            redis::Client::open(config.redis_uri.clone()).context("Invalid Redis URI")?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let quiz = &config.quiz;
        Ok(Self {
            store: Arc::new(store),
            asked: Arc::new(asked),
            cache: Arc::new(RedisUserCache::new(redis.clone(), quiz.user_cache_ttl())),
            guard: Arc::new(RedisDuplicateGuard::new(
                redis.clone(),
                quiz.duplicate_guard_ttl(),
            )),
            index: Arc::new(RedisRankIndex::new(redis.clone())),
            secondary: Arc::new(RedisSecondarySync::new(
                redis.clone(),
                quiz.user_cache_ttl(),
                quiz.duplicate_guard_ttl(),
            )),
            rate_limiter: Arc::new(RedisRateLimiter::new(
                redis,
                config.rate_limit.requests_per_window,
                config.rate_limit.window_secs,
            )),
        })
    }
}

impl From<&MemoryBackends> for Backends {
    fn from(memory: &MemoryBackends) -> Self {
        Self {
            store: memory.store.clone(),
            asked: memory.asked.clone(),
            cache: memory.cache.clone(),
            guard: memory.guard.clone(),
            index: memory.index.clone(),
            secondary: memory.secondary_sync(),
            rate_limiter: memory.rate_limiter.clone(),
        }
    }
}

/// Outcome of a dependency probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub store: bool,
    pub cache: bool,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.store && self.cache
    }
}

pub struct AppState {
    pub config: Config,
    pub users: Arc<UserService>,
    pub questions: QuestionService,
    pub answers: AnswerService,
    pub leaderboard: LeaderboardService,
    pub rate_limiter: Arc<dyn RateLimiter>,
    store: Arc<dyn UserStore>,
    cache: Arc<dyn UserCache>,
}

impl AppState {
    pub fn new(config: Config, backends: Backends, catalog: Arc<QuestionCatalog>) -> Self {
        let users = Arc::new(UserService::new(
            backends.store.clone(),
            backends.cache.clone(),
            config.quiz.streak_decay_window(),
        ));
        let provider: Arc<dyn QuestionProvider> = Arc::new(CatalogQuestionProvider::new(
            catalog,
            backends.asked.clone(),
        ));
        let ranks: Arc<dyn RankIndex> = Arc::new(FallbackRankIndex::new(
            backends.index.clone(),
            Arc::new(StoreRankIndex::new(backends.store.clone())),
        ));

        Self {
            questions: QuestionService::new(users.clone(), provider.clone()),
            answers: AnswerService::new(
                users.clone(),
                backends.store.clone(),
                backends.guard.clone(),
                provider,
                backends.secondary.clone(),
                config.quiz.propagation_timeout(),
            ),
            leaderboard: LeaderboardService::new(
                backends.store.clone(),
                backends.index.clone(),
                ranks,
            ),
            users,
            rate_limiter: backends.rate_limiter.clone(),
            store: backends.store,
            cache: backends.cache,
            config,
        }
    }

    pub async fn health(&self) -> Health {
        let (store, cache) = tokio::join!(self.store.ping(), self.cache.ping());
        if let Err(e) = &store {
            tracing::error!(error = %e, "Store health check failed");
        }
        if let Err(e) = &cache {
            tracing::warn!(error = %e, "Cache health check failed");
        }
        Health {
            store: store.is_ok(),
            cache: cache.is_ok(),
        }
    }
}
