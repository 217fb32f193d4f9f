//! # emotion-db
//!
//! PostgreSQL storage for the emotion pipeline.
//!
//! Snapshot rows and final verdicts live next to the durable stage queue.
//! Workers claim queue rows with `FOR UPDATE SKIP LOCKED`, so several API
//! processes can share one database. [`MemoryStore`] implements the same
//! repository traits without Postgres.
//!
//! ## Example
//!
//! ```rust,ignore
//! use emotion_db::{Database, SnapshotRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/emotion_db").await?;
//!     let seen = db.snapshots.exists_for_pair("u1", "p1").await?;
//!     println!("already analyzed: {}", seen);
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod snapshots;
pub mod verdicts;

// Public so tests/ can reach the fixture helpers.
pub mod test_fixtures;

pub use emotion_core::*;

use sqlx::PgPool;

pub use jobs::PgJobRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig, PoolStats};
pub use snapshots::PgSnapshotRepository;
pub use verdicts::PgVerdictRepository;

/// Postgres-backed repositories sharing one pool.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    pub snapshots: PgSnapshotRepository,
    pub verdicts: PgVerdictRepository,
    pub jobs: PgJobRepository,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self {
            snapshots: PgSnapshotRepository::new(pool.clone()),
            verdicts: PgVerdictRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        create_pool_with_config(url, config).await.map(Self::new)
    }

    /// Apply the bundled schema migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
