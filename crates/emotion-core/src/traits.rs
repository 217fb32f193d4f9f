//! Core traits for pipeline abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::stage::PipelineStage;

// =============================================================================
// SNAPSHOT STORE
// =============================================================================

/// Durable storage of users, posts, and snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Whether any snapshot exists for the pair.
    async fn exists_for_pair(&self, user_id: &str, post_id: &str) -> Result<bool>;

    /// Create the user if absent. Commits on its own.
    async fn ensure_user(&self, user_id: &str) -> Result<()>;

    /// Create the post if absent. Commits on its own.
    async fn ensure_post(&self, post_id: &str) -> Result<()>;

    /// Insert one unlabeled snapshot per payload in a single transaction.
    ///
    /// Payloads are stored as given; callers strip data-URI prefixes.
    /// Returns the number of rows inserted.
    async fn insert_batch(&self, user_id: &str, post_id: &str, payloads: &[String])
        -> Result<u64>;

    /// Snapshots of the pair whose label is still unset, oldest first.
    async fn list_unlabeled(&self, user_id: &str, post_id: &str) -> Result<Vec<Snapshot>>;

    /// Apply all label updates in one transaction.
    ///
    /// Only rows whose label is still unset are touched. Returns the number
    /// of rows labeled.
    async fn apply_labels(&self, updates: &[LabelUpdate]) -> Result<u64>;

    /// Every label of the pair, unset ones included.
    async fn labels_for_pair(&self, user_id: &str, post_id: &str) -> Result<Vec<Option<String>>>;

    /// All snapshots of the pair, oldest first.
    async fn list_for_pair(&self, user_id: &str, post_id: &str) -> Result<Vec<Snapshot>>;

    /// Remove every user, post, snapshot, and verdict, plus the stage job
    /// history that may still reference raw payloads.
    async fn truncate_all(&self) -> Result<()>;
}

/// Storage of aggregated verdicts.
#[async_trait]
pub trait VerdictRepository: Send + Sync {
    /// Insert a new verdict row for the pair.
    async fn insert(&self, user_id: &str, post_id: &str, emotion: &str) -> Result<FinalVerdict>;

    /// List verdicts with their pair's snapshot count, ordered by post id.
    async fn list(&self, filter: &VerdictFilter) -> Result<Vec<VerdictSummary>>;
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Durable queue of pipeline stage jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job.
    ///
    /// When `pipeline_id` is `None` the job starts a new pipeline and its
    /// own id becomes the pipeline id.
    async fn queue(
        &self,
        pipeline_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
    ) -> Result<Uuid>;

    /// Claim the next pending job whose type is in `job_types`.
    /// An empty slice means "claim any type".
    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>>;

    /// Mark job as completed. The payload is cleared; only the result body
    /// is kept.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark job as failed. Retryable failures go back to pending while
    /// retries remain; a terminal failure clears the payload.
    async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// All jobs of a pipeline, oldest first.
    async fn list_for_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Job>>;

    /// Get pending jobs count.
    async fn pending_count(&self) -> Result<i64>;

    /// Delete finished jobs beyond the `keep_count` most recent. Pending and
    /// running jobs are never deleted. Returns the number removed.
    async fn cleanup(&self, keep_count: i64) -> Result<i64>;
}

// =============================================================================
// STATUS LEDGER
// =============================================================================

/// Process-wide key/value record of each submission's current stage.
///
/// Last writer wins; records are not required to survive a restart.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Record `stage` only if the job has no record yet.
    ///
    /// Returns whether the record was created.
    async fn init_status(&self, job_id: Uuid, stage: PipelineStage) -> Result<bool>;

    /// Record the current stage.
    async fn set_status(&self, job_id: Uuid, stage: PipelineStage) -> Result<()>;

    /// Record `error` as the stage together with a message.
    async fn set_error(&self, job_id: Uuid, message: &str) -> Result<()>;

    /// Read the record, if any.
    async fn get_status(&self, job_id: Uuid) -> Result<Option<StatusRecord>>;
}

// =============================================================================
// CLASSIFIER
// =============================================================================

/// Opaque image-to-emotion inference.
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    /// Return the dominant emotion label of an encoded image.
    async fn classify(&self, image: &[u8]) -> Result<String>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Get the model or backend name being used.
    fn model_name(&self) -> &str;
}
