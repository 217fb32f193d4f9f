//! # emotion-core
//!
//! Core types, traits, and abstractions for the emotion pipeline.
//!
//! This crate provides the data model shared by every stage (users, posts,
//! snapshots, final verdicts, queued jobs), the storage, ledger and
//! classifier seams the pipeline is written against, and the deterministic
//! scoring that turns a set of per-snapshot labels into one verdict.
//!
//! ## Logging conventions
//!
//! Every crate logs through `tracing` with the structured fields
//! `subsystem` (`api`, `db`, `inference`, `jobs`, `ledger`), `component`,
//! `op`, and the entity ids in play (`job_id`, `pipeline_id`, `user_id`,
//! `post_id`, `snapshot_id`). Durations are `duration_ms`.
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), stage completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (one line per snapshot) |

pub mod aggregate;
pub mod defaults;
pub mod error;
pub mod models;
pub mod stage;
pub mod traits;

// Re-export commonly used types at crate root
pub use aggregate::{aggregate_labels, average_score, label_weight, verdict_for_score, Emotion};
pub use error::{Error, Result};
pub use models::*;
pub use stage::PipelineStage;
pub use traits::*;
