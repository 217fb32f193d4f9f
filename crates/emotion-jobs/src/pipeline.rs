//! Pipeline orchestration: submission, stage handoff, and status lookup.
//!
//! A submission runs as a chain of durable jobs,
//! `intake -> registration -> classification -> aggregation`, all sharing
//! the intake job's id as their `pipeline_id`. Each stage queues the next
//! only after its own writes are committed, and passes nothing but the
//! pair and (for registration) the raw payloads through the job payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use emotion_core::stage::OUTCOME_KEY;
use emotion_core::{
    EmotionClassifier, Error, JobRepository, JobStatus, JobType, PipelineStage, Result,
    SnapshotRepository, VerdictRepository,
};

use crate::handler::JobResult;
use crate::ledger::Ledger;
use crate::stages::{
    AggregationHandler, ClassificationHandler, IntakeHandler, RegistrationHandler,
};
use crate::worker::WorkerBuilder;

/// Payload carried by every stage job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePayload {
    pub user_id: String,
    pub post_id: String,
    /// Raw snapshot payloads; only intake and registration carry them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<String>,
}

impl StagePayload {
    /// Same pair, no snapshots.
    pub fn pair_only(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            post_id: self.post_id.clone(),
            snapshots: Vec::new(),
        }
    }
}

/// One stage job of a submission, as reported by [`Pipeline::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Result body of a finished stage, e.g. the snapshots classification
    /// could not label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Current state of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub job_id: Uuid,
    pub status: PipelineStage,
    pub error_message: Option<String>,
    pub stages: Vec<StageSummary>,
}

/// Shared dependencies of every stage.
#[derive(Clone)]
pub struct Pipeline {
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub verdicts: Arc<dyn VerdictRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub classifier: Arc<dyn EmotionClassifier>,
    pub ledger: Ledger,
}

impl Pipeline {
    pub fn new(
        snapshots: Arc<dyn SnapshotRepository>,
        verdicts: Arc<dyn VerdictRepository>,
        jobs: Arc<dyn JobRepository>,
        classifier: Arc<dyn EmotionClassifier>,
        ledger: Ledger,
    ) -> Self {
        Self {
            snapshots,
            verdicts,
            jobs,
            classifier,
            ledger,
        }
    }

    /// Accept a submission and queue its intake stage.
    ///
    /// Returns the job id callers poll with. No stage has run yet when this
    /// returns.
    pub async fn submit(
        &self,
        user_id: &str,
        post_id: &str,
        snapshots: Vec<String>,
    ) -> Result<Uuid> {
        if user_id.trim().is_empty() || post_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "user_id and post_id must not be empty".to_string(),
            ));
        }
        if snapshots.is_empty() {
            return Err(Error::InvalidInput("snapshots must not be empty".to_string()));
        }

        let count = snapshots.len();
        let payload = serde_json::to_value(StagePayload {
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
            snapshots,
        })?;
        let job_id = self.jobs.queue(None, JobType::Intake, Some(payload)).await?;
        // Intake may already have written a later stage.
        self.ledger.init(job_id, PipelineStage::Pending).await;

        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "submit",
            %job_id,
            user_id,
            post_id,
            snapshot_count = count,
            "Submission accepted"
        );
        Ok(job_id)
    }

    /// Current stage of a submission plus its stage jobs.
    ///
    /// Uses the ledger record when present and falls back to the queue
    /// history. A failed stage job overrides a stale non-terminal record.
    pub async fn status(&self, job_id: Uuid) -> Result<Option<PipelineStatus>> {
        let jobs = self.jobs.list_for_pipeline(job_id).await?;
        let record = match self.ledger.get(job_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(subsystem = "ledger", %job_id, error = %e, "Status ledger read failed");
                None
            }
        };
        let from_history = PipelineStage::from_history(&jobs);

        let (status, error_message) = match (record, from_history) {
            (None, None) => return Ok(None),
            (Some(record), Some(PipelineStage::Error)) if !record.status.is_terminal() => {
                (PipelineStage::Error, last_error(&jobs))
            }
            (Some(record), _) => (record.status, record.error_message),
            (None, Some(stage)) => {
                let message = (stage == PipelineStage::Error)
                    .then(|| last_error(&jobs))
                    .flatten();
                (stage, message)
            }
        };

        Ok(Some(PipelineStatus {
            job_id,
            status,
            error_message,
            stages: jobs
                .into_iter()
                .map(|j| StageSummary {
                    job_id: j.id,
                    job_type: j.job_type,
                    status: j.status,
                    error_message: j.error_message,
                    result: j.result,
                })
                .collect(),
        }))
    }

    /// Register the four stage handlers on a worker builder.
    pub fn register_handlers(&self, builder: WorkerBuilder) -> WorkerBuilder {
        builder
            .with_handler(IntakeHandler::new(self.clone()))
            .with_handler(RegistrationHandler::new(self.clone()))
            .with_handler(ClassificationHandler::new(self.clone()))
            .with_handler(AggregationHandler::new(self.clone()))
    }

    /// Queue the next stage of a submission.
    pub(crate) async fn schedule(
        &self,
        pipeline_id: Uuid,
        job_type: JobType,
        payload: &StagePayload,
    ) -> Result<Uuid> {
        let payload = serde_json::to_value(payload)?;
        self.jobs
            .queue(Some(pipeline_id), job_type, Some(payload))
            .await
    }

    /// Record a stage-fatal error and build the job result for it.
    pub(crate) async fn fail_stage(
        &self,
        pipeline_id: Uuid,
        job_type: JobType,
        message: impl Into<String>,
    ) -> JobResult {
        let message = message.into();
        error!(
            subsystem = "jobs",
            component = job_type.as_str(),
            %pipeline_id,
            error = %message,
            "Stage failed"
        );
        self.ledger.record_error(pipeline_id, &message).await;
        JobResult::Failed(message)
    }
}

/// Result body of a stage that finished with `outcome`.
pub(crate) fn outcome(stage: PipelineStage) -> serde_json::Value {
    json!({ OUTCOME_KEY: stage.as_str() })
}

fn last_error(jobs: &[emotion_core::Job]) -> Option<String> {
    jobs.iter()
        .rev()
        .find(|j| j.status == JobStatus::Failed)
        .and_then(|j| j.error_message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotion_db::MemoryStore;
    use emotion_inference::MockEmotionClassifier;

    fn pipeline(store: &MemoryStore) -> Pipeline {
        let store = Arc::new(store.clone());
        Pipeline::new(
            store.clone(),
            store.clone(),
            store,
            Arc::new(MockEmotionClassifier::new()),
            Ledger::memory(),
        )
    }

    #[test]
    fn test_stage_payload_omits_empty_snapshots() {
        let payload = StagePayload {
            user_id: "u1".to_string(),
            post_id: "p1".to_string(),
            snapshots: vec!["a".to_string()],
        };
        let json = serde_json::to_value(payload.pair_only()).unwrap();
        assert!(json.get("snapshots").is_none());

        let back: StagePayload = serde_json::from_value(json).unwrap();
        assert!(back.snapshots.is_empty());
        assert_eq!(back.user_id, "u1");
    }

    #[test]
    fn test_outcome_body() {
        assert_eq!(outcome(PipelineStage::NoData)["outcome"], "no_data");
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_batch() {
        let store = MemoryStore::new();
        let err = pipeline(&store)
            .submit("u1", "p1", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_ids() {
        let store = MemoryStore::new();
        let err = pipeline(&store)
            .submit(" ", "p1", vec!["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_submit_queues_intake_and_records_pending() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store);
        let job_id = pipeline
            .submit("u1", "p1", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_id);
        assert_eq!(jobs[0].pipeline_id, job_id);
        assert_eq!(jobs[0].job_type, JobType::Intake);
        let payload: StagePayload =
            serde_json::from_value(jobs[0].payload.clone().unwrap()).unwrap();
        assert_eq!(payload.snapshots.len(), 2);

        let status = pipeline.status(job_id).await.unwrap().unwrap();
        assert_eq!(status.status, PipelineStage::Pending);
        assert_eq!(status.stages.len(), 1);
    }

    #[tokio::test]
    async fn test_status_unknown_job() {
        let store = MemoryStore::new();
        assert!(pipeline(&store)
            .status(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_status_falls_back_to_history() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store);
        // Queued directly, so the ledger has no record.
        let id = store.queue(None, JobType::Intake, None).await.unwrap();
        store.claim_next_for_types(&[]).await.unwrap();
        store.fail(id, "bad payload", false).await.unwrap();

        let status = pipeline.status(id).await.unwrap().unwrap();
        assert_eq!(status.status, PipelineStage::Error);
        assert_eq!(status.error_message.as_deref(), Some("bad payload"));
    }

    #[tokio::test]
    async fn test_failed_job_overrides_stale_record() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store);
        let id = pipeline.submit("u1", "p1", vec!["a".to_string()]).await.unwrap();
        store.claim_next_for_types(&[]).await.unwrap();
        store.fail(id, "handler timeout after 1s", false).await.unwrap();

        let status = pipeline.status(id).await.unwrap().unwrap();
        assert_eq!(status.status, PipelineStage::Error);
        assert!(status.error_message.unwrap().contains("timeout"));
    }
}
