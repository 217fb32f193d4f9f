//! Core data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults::DATA_URI_IMAGE_PREFIX;
use crate::stage::PipelineStage;

// =============================================================================
// SNAPSHOTS AND VERDICTS
// =============================================================================

/// One submitted image tied to a (user, post) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub user_id: String,
    pub post_id: String,
    /// Base64 image payload, data-URI prefix already stripped.
    pub snapshot: String,
    /// Unset until classified; never overwritten once set.
    pub emotion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw snapshot as exposed to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotView {
    pub snapshot: String,
    pub emotion: Option<String>,
}

impl From<Snapshot> for SnapshotView {
    fn from(s: Snapshot) -> Self {
        Self {
            snapshot: s.snapshot,
            emotion: s.emotion,
        }
    }
}

/// Label assignment produced by one classification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelUpdate {
    pub snapshot_id: i64,
    pub emotion: String,
}

/// Aggregated verdict row for a (user, post) pair.
///
/// Rows accumulate: every aggregation run inserts a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub id: i64,
    pub user_id: String,
    pub post_id: String,
    pub emotion: String,
    pub created_at: DateTime<Utc>,
}

/// Verdict row joined with the number of snapshots stored for its pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub user_id: String,
    pub post_id: String,
    pub emotion: String,
    pub created_at: DateTime<Utc>,
    pub snapshot_count: i64,
}

/// Optional filters for listing verdicts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerdictFilter {
    pub user_id: Option<String>,
    pub post_id: Option<String>,
}

/// Strip a leading `data:image/...;base64,` prefix from a submitted payload.
///
/// Bare payloads are returned unchanged.
pub fn strip_data_uri(payload: &str) -> &str {
    if payload.starts_with(DATA_URI_IMAGE_PREFIX) {
        if let Some((_, data)) = payload.split_once(',') {
            return data;
        }
    }
    payload
}

// =============================================================================
// JOBS
// =============================================================================

/// Status of a job in the processing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse a database string, falling back to `Pending`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// Pipeline stage a queued job executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Validate the submission and reject duplicates
    Intake,
    /// Persist users, posts, and the snapshot batch
    Registration,
    /// Label every unlabeled snapshot of the pair
    Classification,
    /// Compute and store the final verdict
    Aggregation,
}

impl JobType {
    /// All stages in pipeline order.
    pub const ALL: [JobType; 4] = [
        JobType::Intake,
        JobType::Registration,
        JobType::Classification,
        JobType::Aggregation,
    ];

    /// Default priority (higher = more urgent). Later stages win so that
    /// in-flight submissions drain before new ones start.
    pub fn default_priority(&self) -> i32 {
        match self {
            JobType::Intake => 2,
            JobType::Registration => 3,
            JobType::Classification => 4,
            JobType::Aggregation => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Intake => "intake",
            JobType::Registration => "registration",
            JobType::Classification => "classification",
            JobType::Aggregation => "aggregation",
        }
    }

    /// Parse a database string.
    pub fn from_db(s: &str) -> Option<Self> {
        JobType::ALL.into_iter().find(|jt| jt.as_str() == s)
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Id of the submission this stage belongs to (the intake job's id).
    pub pipeline_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// STATUS LEDGER
// =============================================================================

/// Current stage of a submission as recorded in the status ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: PipelineStage,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_data_uri_prefixed() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("data:image/jpeg;base64,/9j/4AAQ"), "/9j/4AAQ");
    }

    #[test]
    fn test_strip_data_uri_bare_payload_unchanged() {
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
        assert_eq!(strip_data_uri(""), "");
    }

    #[test]
    fn test_strip_data_uri_equivalence() {
        let bare = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB";
        let prefixed = format!("data:image/png;base64,{}", bare);
        assert_eq!(strip_data_uri(&prefixed), strip_data_uri(bare));
    }

    #[test]
    fn test_strip_data_uri_only_first_comma() {
        assert_eq!(strip_data_uri("data:image/png;base64,AB,CD"), "AB,CD");
    }

    #[test]
    fn test_strip_data_uri_non_image_prefix_untouched() {
        assert_eq!(
            strip_data_uri("data:text/plain;base64,QUJD"),
            "data:text/plain;base64,QUJD"
        );
    }

    #[test]
    fn test_job_type_db_roundtrip() {
        for jt in JobType::ALL {
            assert_eq!(JobType::from_db(jt.as_str()), Some(jt));
        }
        assert_eq!(JobType::from_db("embedding"), None);
    }

    #[test]
    fn test_job_type_priorities_increase_along_pipeline() {
        let priorities: Vec<i32> = JobType::ALL.iter().map(|jt| jt.default_priority()).collect();
        assert!(priorities.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_job_status_from_db_fallback() {
        assert_eq!(JobStatus::from_db("running"), JobStatus::Running);
        assert_eq!(JobStatus::from_db("completed"), JobStatus::Completed);
        assert_eq!(JobStatus::from_db("failed"), JobStatus::Failed);
        assert_eq!(JobStatus::from_db("garbage"), JobStatus::Pending);
    }

    #[test]
    fn test_snapshot_view_from_snapshot() {
        let now = Utc::now();
        let snap = Snapshot {
            id: 7,
            user_id: "u".into(),
            post_id: "p".into(),
            snapshot: "QUJD".into(),
            emotion: Some("happy".into()),
            created_at: now,
            updated_at: now,
        };
        let view = SnapshotView::from(snap);
        assert_eq!(view.snapshot, "QUJD");
        assert_eq!(view.emotion.as_deref(), Some("happy"));
    }
}
