//! Database connection pool management.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use emotion_core::defaults::JOB_MAX_CONCURRENT;
use emotion_core::{Error, Result};

/// Connections reserved for HTTP handlers on top of one per stage worker slot.
pub const API_CONNECTION_HEADROOM: u32 = 6;

pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Sizing and timeouts for the Postgres pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` keeps connections until they go idle.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: JOB_MAX_CONCURRENT as u32 + API_CONNECTION_HEADROOM,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS)),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DB_MAX_CONNECTIONS` | worker slots + 6 |
    /// | `DB_MIN_CONNECTIONS` | `1` |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | `30` |
    /// | `DB_MAX_LIFETIME_SECS` | `1800` (`0` disables) |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_connections = env_or("DB_MAX_CONNECTIONS", defaults.max_connections).max(1);
        let lifetime_secs = env_or("DB_MAX_LIFETIME_SECS", DEFAULT_MAX_LIFETIME_SECS);

        Self {
            max_connections,
            min_connections: env_or("DB_MIN_CONNECTIONS", defaults.min_connections)
                .min(max_connections),
            acquire_timeout: Duration::from_secs(env_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )),
            max_lifetime: (lifetime_secs > 0).then(|| Duration::from_secs(lifetime_secs)),
            ..defaults
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connect with [`PoolConfig::default`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    debug!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Opening Postgres pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Postgres pool ready"
    );
    Ok(pool)
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

impl PoolStats {
    /// Every open connection is checked out.
    pub fn saturated(&self) -> bool {
        self.size > 0 && self.idle == 0
    }
}

/// Log pool occupancy and return it. Warns when the pool is saturated.
pub fn log_pool_metrics(pool: &PgPool) -> PoolStats {
    let stats = PoolStats {
        size: pool.size(),
        idle: pool.num_idle(),
    };
    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = stats.size,
        pool_idle = stats.idle,
        "Pool occupancy"
    );
    if stats.saturated() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = stats.size,
            "No idle database connections; stage workers may stall"
        );
    }
    stats
}
