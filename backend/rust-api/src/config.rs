use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// MongoDB store of record + Redis secondary stores
    External,
    /// In-process stores, for local runs and tests
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "external" | "mongo" => Some(Self::External),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizSettings {
    pub streak_decay_window_secs: u64,
    pub user_cache_ttl_secs: u64,
    pub duplicate_guard_ttl_secs: u64,
    pub propagation_timeout_ms: u64,
    pub rebuild_rank_index_on_start: bool,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            streak_decay_window_secs: 24 * 60 * 60,
            user_cache_ttl_secs: 24 * 60 * 60,
            duplicate_guard_ttl_secs: 5,
            propagation_timeout_ms: 500,
            rebuild_rank_index_on_start: false,
        }
    }
}

impl QuizSettings {
    pub fn streak_decay_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.streak_decay_window_secs as i64)
    }

    pub fn user_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.user_cache_ttl_secs)
    }

    pub fn duplicate_guard_ttl(&self) -> Duration {
        Duration::from_secs(self.duplicate_guard_ttl_secs)
    }

    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_millis(self.propagation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 100,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub listen_addr: String,
    pub storage_backend: StorageBackend,
    pub quiz: QuizSettings,
    pub rate_limit: RateLimitSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "brainbolt".to_string(),
            listen_addr: "0.0.0.0:3001".to_string(),
            storage_backend: StorageBackend::External,
            quiz: QuizSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml first, APP__SECTION__KEY overrides on top
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| match env::var("REDIS_HOST") {
                Ok(host) => {
                    let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                    match env::var("REDIS_PASSWORD") {
                        Ok(password) if !password.is_empty() => {
                            format!("redis://:{}@{}:{}/0", password, host, port)
                        }
                        _ => format!("redis://{}:{}/0", host, port),
                    }
                }
                Err(_) => defaults.redis_uri.clone(),
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let listen_addr = settings
            .get_string("server.listen_addr")
            .or_else(|_| env::var("LISTEN_ADDR"))
            .unwrap_or(defaults.listen_addr);

        let storage_backend = match settings
            .get_string("storage.backend")
            .or_else(|_| env::var("STORAGE_BACKEND"))
        {
            Ok(raw) => StorageBackend::parse(&raw).ok_or_else(|| {
                config::ConfigError::Message(format!("unknown storage backend: {}", raw))
            })?,
            Err(_) => defaults.storage_backend,
        };

        let quiz_defaults = defaults.quiz;
        let quiz = QuizSettings {
            streak_decay_window_secs: settings
                .get::<u64>("quiz.streak_decay_window_secs")
                .unwrap_or(quiz_defaults.streak_decay_window_secs),
            user_cache_ttl_secs: settings
                .get::<u64>("quiz.user_cache_ttl_secs")
                .unwrap_or(quiz_defaults.user_cache_ttl_secs),
            duplicate_guard_ttl_secs: settings
                .get::<u64>("quiz.duplicate_guard_ttl_secs")
                .unwrap_or(quiz_defaults.duplicate_guard_ttl_secs),
            propagation_timeout_ms: settings
                .get::<u64>("quiz.propagation_timeout_ms")
                .unwrap_or(quiz_defaults.propagation_timeout_ms),
            rebuild_rank_index_on_start: settings
                .get::<bool>("quiz.rebuild_rank_index_on_start")
                .unwrap_or(quiz_defaults.rebuild_rank_index_on_start),
        };

        if quiz.streak_decay_window_secs == 0 {
            return Err(config::ConfigError::Message(
                "quiz.streak_decay_window_secs must be positive".to_string(),
            ));
        }

        let rate_defaults = defaults.rate_limit;
        let rate_limit_disabled = env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1";
        let rate_limit = RateLimitSettings {
            enabled: !rate_limit_disabled
                && settings
                    .get::<bool>("rate_limit.enabled")
                    .unwrap_or(rate_defaults.enabled),
            requests_per_window: settings
                .get::<u32>("rate_limit.requests_per_window")
                .unwrap_or(rate_defaults.requests_per_window),
            window_secs: settings
                .get::<u64>("rate_limit.window_secs")
                .unwrap_or(rate_defaults.window_secs),
        };

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            listen_addr,
            storage_backend,
            quiz,
            rate_limit,
        })
    }
}
