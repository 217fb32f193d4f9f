//! Registration: persist the user, the post, and the snapshot batch.

use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use emotion_core::{strip_data_uri, JobType, PipelineStage, SnapshotRepository};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::{outcome, Pipeline, StagePayload};

pub struct RegistrationHandler {
    pipeline: Pipeline,
}

impl RegistrationHandler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    async fn fail(&self, ctx: &JobContext, message: String) -> JobResult {
        self.pipeline
            .fail_stage(ctx.pipeline_id(), JobType::Registration, message)
            .await
    }
}

#[async_trait]
impl JobHandler for RegistrationHandler {
    fn job_type(&self) -> JobType {
        JobType::Registration
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "registration", op = "execute", pipeline_id = %ctx.pipeline_id())
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let pipeline_id = ctx.pipeline_id();
        let payload: StagePayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return self.fail(&ctx, e).await,
        };
        let store = &self.pipeline.snapshots;

        // Each commits on its own so a failed batch leaves no dangling reference.
        if let Err(e) = store.ensure_user(&payload.user_id).await {
            return self.fail(&ctx, format!("Failed to register user: {}", e)).await;
        }
        if let Err(e) = store.ensure_post(&payload.post_id).await {
            return self.fail(&ctx, format!("Failed to register post: {}", e)).await;
        }

        // Intake admitted this pair with no rows, so rows here mean an
        // earlier attempt of this job already committed the batch.
        let already_stored = match store
            .exists_for_pair(&payload.user_id, &payload.post_id)
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                return self
                    .fail(&ctx, format!("Failed to check stored snapshots: {}", e))
                    .await
            }
        };

        let inserted = if already_stored {
            warn!(
                user_id = %payload.user_id,
                post_id = %payload.post_id,
                "Snapshots already stored for pair, skipping insert"
            );
            0
        } else {
            let cleaned: Vec<String> = payload
                .snapshots
                .iter()
                .map(|s| strip_data_uri(s).to_string())
                .collect();
            debug!(snapshot_count = cleaned.len(), "Inserting snapshot batch");

            match store
                .insert_batch(&payload.user_id, &payload.post_id, &cleaned)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    return self
                        .fail(&ctx, format!("Failed to store snapshots: {}", e))
                        .await
                }
            }
        };
        ctx.report_progress(80, Some("Snapshots stored"));

        self.pipeline
            .ledger
            .record(pipeline_id, PipelineStage::Registered)
            .await;

        if let Err(e) = self
            .pipeline
            .schedule(pipeline_id, JobType::Classification, &payload.pair_only())
            .await
        {
            return self
                .fail(&ctx, format!("Failed to queue classification: {}", e))
                .await;
        }

        info!(
            user_id = %payload.user_id,
            post_id = %payload.post_id,
            snapshot_count = inserted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Snapshots registered"
        );

        let mut body = outcome(PipelineStage::Registered);
        body["snapshot_count"] = json!(inserted);
        if already_stored {
            body["already_stored"] = json!(true);
        }
        JobResult::Success(Some(body))
    }
}
