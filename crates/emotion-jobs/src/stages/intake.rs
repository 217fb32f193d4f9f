//! Intake: validate the submission and reject duplicates.

use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::{info, instrument};

use emotion_core::{JobType, PipelineStage, SnapshotRepository};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::{outcome, Pipeline, StagePayload};

pub struct IntakeHandler {
    pipeline: Pipeline,
}

impl IntakeHandler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for IntakeHandler {
    fn job_type(&self) -> JobType {
        JobType::Intake
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "intake", op = "execute", pipeline_id = %ctx.pipeline_id())
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let pipeline_id = ctx.pipeline_id();
        let payload: StagePayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return self.pipeline.fail_stage(pipeline_id, JobType::Intake, e).await,
        };

        self.pipeline
            .ledger
            .record(pipeline_id, PipelineStage::Processing)
            .await;

        if payload.snapshots.is_empty() {
            return self
                .pipeline
                .fail_stage(pipeline_id, JobType::Intake, "snapshots must not be empty")
                .await;
        }

        let exists = match self
            .pipeline
            .snapshots
            .exists_for_pair(&payload.user_id, &payload.post_id)
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                return self
                    .pipeline
                    .fail_stage(
                        pipeline_id,
                        JobType::Intake,
                        format!("Duplicate check failed: {}", e),
                    )
                    .await
            }
        };

        if exists {
            info!(
                user_id = %payload.user_id,
                post_id = %payload.post_id,
                "Snapshots already stored for pair, submission cancelled"
            );
            self.pipeline
                .ledger
                .record(pipeline_id, PipelineStage::Cancelled)
                .await;
            return JobResult::Success(Some(outcome(PipelineStage::Cancelled)));
        }

        ctx.report_progress(50, Some("Queueing registration"));
        self.pipeline
            .ledger
            .record(pipeline_id, PipelineStage::Submitted)
            .await;

        let next_job_id = match self
            .pipeline
            .schedule(pipeline_id, JobType::Registration, &payload)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                return self
                    .pipeline
                    .fail_stage(
                        pipeline_id,
                        JobType::Intake,
                        format!("Failed to queue registration: {}", e),
                    )
                    .await
            }
        };

        info!(
            user_id = %payload.user_id,
            post_id = %payload.post_id,
            snapshot_count = payload.snapshots.len(),
            %next_job_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Submission passed intake"
        );

        let mut body = outcome(PipelineStage::Submitted);
        body["next_job_id"] = json!(next_job_id);
        JobResult::Success(Some(body))
    }
}
