//! # emotion-jobs
//!
//! Stage workers and orchestration for the emotion pipeline.
//!
//! This crate provides:
//! - The four pipeline stages (intake, registration, classification,
//!   aggregation) as job handlers
//! - A polling worker with bounded concurrency and per-job timeouts
//! - The status ledger (Redis, or in-process for tests and single-node runs)
//! - [`Pipeline`], which accepts submissions and reports their status
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use emotion_db::Database;
//! use emotion_inference::HttpEmotionBackend;
//! use emotion_jobs::{Ledger, Pipeline, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let pipeline = Pipeline::new(
//!     Arc::new(db.snapshots.clone()),
//!     Arc::new(db.verdicts.clone()),
//!     Arc::new(db.jobs.clone()),
//!     Arc::new(HttpEmotionBackend::from_env()),
//!     Ledger::from_env().await,
//! );
//!
//! let worker = pipeline
//!     .register_handlers(WorkerBuilder::new(Arc::new(db.jobs.clone())))
//!     .with_config(WorkerConfig::from_env())
//!     .build()
//!     .await;
//! let handle = worker.start();
//!
//! let job_id = pipeline.submit("u1", "p1", vec![snapshot]).await?;
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod ledger;
pub mod pipeline;
pub mod stages;
pub mod worker;

// Re-export core types
pub use emotion_core::*;

pub use handler::{JobContext, JobHandler, JobResult};
pub use ledger::{Ledger, MemoryStatusLedger, RedisStatusLedger};
pub use pipeline::{Pipeline, PipelineStatus, StagePayload, StageSummary};
pub use stages::{AggregationHandler, ClassificationHandler, IntakeHandler, RegistrationHandler};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum retries for failed jobs.
pub const DEFAULT_MAX_RETRIES: i32 = emotion_core::defaults::JOB_MAX_RETRIES;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = emotion_core::defaults::JOB_POLL_INTERVAL_MS;
