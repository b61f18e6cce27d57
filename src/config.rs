//! Process configuration read from environment variables

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Object storage connection settings (MinIO/S3)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub port: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

impl StorageConfig {
    pub fn endpoint_url(&self) -> String {
        let protocol = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", protocol, self.endpoint, self.port)
    }
}

/// Eviction policy of the test-case cache
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub time_to_live: Duration,
    pub time_to_idle: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            time_to_live: Duration::from_secs(6 * 60 * 60),
            time_to_idle: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub database_url: String,
    pub sandbox_endpoint: String,
    pub sandbox_timeout: Duration,
    pub storage: StorageConfig,
    pub bind_addr: String,
    pub worker_count: usize,
    pub dedup_window: Duration,
    pub reply_timeout: Duration,
    pub cache: CacheConfig,
    pub contest_grace: Duration,
    /// Problems whose fixtures are loaded into the cache at startup
    pub preload_problems: Vec<i64>,
}

impl AppConfig {
    /// Build the configuration from the environment.
    ///
    /// Missing variables fall back to their defaults; a present but unparseable
    /// value is an error naming the variable.
    pub fn from_env() -> Result<Self> {
        let storage = StorageConfig {
            endpoint: env_or("MINIO_ENDPOINT", "localhost"),
            port: env_or("MINIO_PORT", "9000"),
            access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
            bucket: env_or("MINIO_BUCKET", "problem"),
            use_ssl: std::env::var("MINIO_USE_SSL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        let cache = CacheConfig {
            max_entries: parse_env("TESTCASE_CACHE_MAX_ENTRIES", 1000)?,
            time_to_live: Duration::from_secs(parse_env("TESTCASE_CACHE_TTL_SECS", 21_600)?),
            time_to_idle: Duration::from_secs(parse_env("TESTCASE_CACHE_TTI_SECS", 7_200)?),
        };

        Ok(Self {
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            database_url: env_or("DATABASE_URL", "sqlite://oj.sqlite3?mode=rwc"),
            sandbox_endpoint: env_or("SANDBOX_ENDPOINT", "http://127.0.0.1:5050"),
            sandbox_timeout: Duration::from_secs(parse_env("SANDBOX_TIMEOUT_SECS", 30)?),
            storage,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            worker_count: parse_env("WORKER_COUNT", 4)?,
            dedup_window: Duration::from_millis(parse_env("DEDUP_WINDOW_MS", 3_000)?),
            reply_timeout: Duration::from_secs(parse_env("REPLY_TIMEOUT_SECS", 10)?),
            cache,
            contest_grace: Duration::from_secs(parse_env("CONTEST_GRACE_SECS", 600)?),
            preload_problems: parse_list("TESTCASE_PRELOAD")?,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list; unset or empty means none
fn parse_list<T>(name: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(name).unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .with_context(|| format!("Invalid entry in {}: {:?}", name, item))
        })
        .collect()
}
