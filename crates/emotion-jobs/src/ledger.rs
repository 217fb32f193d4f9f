//! Status ledger backends and the best-effort wrapper stages write through.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_ENABLED`: Set to "false" to keep statuses in process memory (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `STATUS_TTL_SECS`: Lifetime of a status record after its last write (default: 86400)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use emotion_core::defaults::{
    LEDGER_WRITE_TIMEOUT_MS, REDIS_URL, STATUS_KEY_PREFIX, STATUS_TTL_SECS,
};
use emotion_core::{Error, PipelineStage, Result, StatusLedger, StatusRecord};

const STATUS_FIELD: &str = "status";
const ERROR_FIELD: &str = "error_message";

// =============================================================================
// REDIS
// =============================================================================

/// Ledger backed by one Redis hash per job: `task:{job_id}` with fields
/// `status` and `error_message`.
#[derive(Clone)]
pub struct RedisStatusLedger {
    connection: ConnectionManager,
    ttl_secs: u64,
}

impl RedisStatusLedger {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("Invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Ledger(format!("Failed to connect to Redis: {}", e)))?;
        Ok(Self {
            connection,
            ttl_secs,
        })
    }

    pub fn key(job_id: Uuid) -> String {
        format!("{}{}", STATUS_KEY_PREFIX, job_id)
    }

    fn ttl(&self) -> i64 {
        self.ttl_secs as i64
    }
}

fn ledger_err(e: redis::RedisError) -> Error {
    Error::Ledger(e.to_string())
}

#[async_trait]
impl StatusLedger for RedisStatusLedger {
    async fn init_status(&self, job_id: Uuid, stage: PipelineStage) -> Result<bool> {
        let key = Self::key(job_id);
        let mut conn = self.connection.clone();
        let (created, _): (bool, bool) = redis::pipe()
            .atomic()
            .hset_nx(&key, STATUS_FIELD, stage.as_str())
            .expire(&key, self.ttl())
            .query_async(&mut conn)
            .await
            .map_err(ledger_err)?;
        Ok(created)
    }

    async fn set_status(&self, job_id: Uuid, stage: PipelineStage) -> Result<()> {
        let key = Self::key(job_id);
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .hset(&key, STATUS_FIELD, stage.as_str())
            .ignore()
            .hdel(&key, ERROR_FIELD)
            .ignore()
            .expire(&key, self.ttl())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(ledger_err)
    }

    async fn set_error(&self, job_id: Uuid, message: &str) -> Result<()> {
        let key = Self::key(job_id);
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    (STATUS_FIELD, PipelineStage::Error.as_str()),
                    (ERROR_FIELD, message),
                ],
            )
            .ignore()
            .expire(&key, self.ttl())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(ledger_err)
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<StatusRecord>> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(Self::key(job_id))
            .await
            .map_err(ledger_err)?;
        record_from_fields(fields)
    }
}

fn record_from_fields(mut fields: HashMap<String, String>) -> Result<Option<StatusRecord>> {
    let Some(status) = fields.remove(STATUS_FIELD) else {
        return Ok(None);
    };
    let status = status
        .parse::<PipelineStage>()
        .map_err(|_| Error::Ledger(format!("Unrecognized status in ledger: {}", status)))?;
    Ok(Some(StatusRecord {
        status,
        error_message: fields.remove(ERROR_FIELD).filter(|m| !m.is_empty()),
    }))
}

// =============================================================================
// MEMORY
// =============================================================================

/// Stages kept per job by [`MemoryStatusLedger::history`]. A full pipeline
/// writes at most seven.
pub const MEMORY_HISTORY_LIMIT: usize = 16;

struct MemoryEntry {
    record: StatusRecord,
    history: Vec<PipelineStage>,
    touched: Instant,
}

/// Process-local ledger, also used as the fallback when Redis is down.
///
/// Records expire `ttl` after their last write, like the Redis keys; expired
/// entries read as absent and are swept on the next write.
#[derive(Clone)]
pub struct MemoryStatusLedger {
    entries: Arc<RwLock<HashMap<Uuid, MemoryEntry>>>,
    ttl: Duration,
}

impl Default for MemoryStatusLedger {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(STATUS_TTL_SECS))
    }
}

impl MemoryStatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Stages recorded for a live job, oldest first.
    pub async fn history(&self, job_id: Uuid) -> Vec<PipelineStage> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(&job_id)
            .filter(|e| now.duration_since(e.touched) < self.ttl)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    /// Number of records held, expired ones not yet swept included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write `record` for `job_id`. With `only_if_absent`, a live record is
    /// left untouched. Returns whether anything was written.
    async fn write(&self, job_id: Uuid, record: StatusRecord, only_if_absent: bool) -> bool {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| now.duration_since(e.touched) < ttl);

        if only_if_absent && entries.contains_key(&job_id) {
            return false;
        }
        let stage = record.status;
        let entry = entries.entry(job_id).or_insert_with(|| MemoryEntry {
            record: record.clone(),
            history: Vec::new(),
            touched: now,
        });
        entry.record = record;
        entry.touched = now;
        if entry.history.len() >= MEMORY_HISTORY_LIMIT {
            entry.history.remove(0);
        }
        entry.history.push(stage);
        true
    }
}

#[async_trait]
impl StatusLedger for MemoryStatusLedger {
    async fn init_status(&self, job_id: Uuid, stage: PipelineStage) -> Result<bool> {
        let record = StatusRecord {
            status: stage,
            error_message: None,
        };
        Ok(self.write(job_id, record, true).await)
    }

    async fn set_status(&self, job_id: Uuid, stage: PipelineStage) -> Result<()> {
        let record = StatusRecord {
            status: stage,
            error_message: None,
        };
        self.write(job_id, record, false).await;
        Ok(())
    }

    async fn set_error(&self, job_id: Uuid, message: &str) -> Result<()> {
        let record = StatusRecord {
            status: PipelineStage::Error,
            error_message: Some(message.to_string()),
        };
        self.write(job_id, record, false).await;
        Ok(())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<StatusRecord>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(&job_id)
            .filter(|e| now.duration_since(e.touched) < self.ttl)
            .map(|e| e.record.clone()))
    }
}

// =============================================================================
// BEST-EFFORT WRAPPER
// =============================================================================

/// Shared ledger handle used by the pipeline.
///
/// Writes never fail the caller: each is bounded by a short timeout and any
/// error is logged at WARN and dropped.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<dyn StatusLedger>,
    write_timeout: Duration,
    backend: &'static str,
}

impl Ledger {
    pub fn new(inner: Arc<dyn StatusLedger>) -> Self {
        Self {
            inner,
            write_timeout: Duration::from_millis(LEDGER_WRITE_TIMEOUT_MS),
            backend: "custom",
        }
    }

    /// In-process ledger.
    pub fn memory() -> Self {
        Self::from_memory(MemoryStatusLedger::new())
    }

    /// Wrap an existing in-memory ledger (tests keep a clone to inspect history).
    pub fn from_memory(ledger: MemoryStatusLedger) -> Self {
        Self {
            backend: "memory",
            ..Self::new(Arc::new(ledger))
        }
    }

    /// Build from environment configuration.
    ///
    /// Falls back to the in-memory ledger when Redis is disabled or
    /// unreachable.
    pub async fn from_env() -> Self {
        let ttl_secs: u64 = std::env::var("STATUS_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(STATUS_TTL_SECS);
        let fallback =
            || Self::from_memory(MemoryStatusLedger::with_ttl(Duration::from_secs(ttl_secs)));

        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        if !enabled {
            info!(subsystem = "ledger", ttl_secs, "Redis status ledger disabled via REDIS_ENABLED=false");
            return fallback();
        }

        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| REDIS_URL.to_string());
        match RedisStatusLedger::connect(&redis_url, ttl_secs).await {
            Ok(ledger) => {
                info!(subsystem = "ledger", ttl_secs, "Redis status ledger enabled");
                Self {
                    backend: "redis",
                    ..Self::new(Arc::new(ledger))
                }
            }
            Err(e) => {
                warn!(
                    subsystem = "ledger",
                    error = %e,
                    ttl_secs,
                    "Redis unavailable, status ledger falls back to process memory"
                );
                fallback()
            }
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// `redis`, `memory`, or `custom`.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Record the initial stage unless a later one was already written.
    pub async fn init(&self, job_id: Uuid, stage: PipelineStage) {
        self.bounded(job_id, "init_status", self.inner.init_status(job_id, stage))
            .await;
    }

    /// Record the current stage.
    pub async fn record(&self, job_id: Uuid, stage: PipelineStage) {
        debug!(subsystem = "ledger", %job_id, stage = %stage, "Recording stage");
        self.bounded(job_id, "set_status", self.inner.set_status(job_id, stage))
            .await;
    }

    /// Record the error stage with a message.
    pub async fn record_error(&self, job_id: Uuid, message: &str) {
        self.bounded(job_id, "set_error", self.inner.set_error(job_id, message))
            .await;
    }

    /// Read the record. Read errors are returned; only writes are best-effort.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<StatusRecord>> {
        self.inner.get_status(job_id).await
    }

    async fn bounded<T, F>(&self, job_id: Uuid, op: &'static str, write: F)
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(subsystem = "ledger", op, %job_id, error = %e, "Status ledger write failed");
            }
            Err(_) => {
                warn!(
                    subsystem = "ledger",
                    op,
                    %job_id,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Status ledger write timed out"
                );
            }
        }
    }
}
