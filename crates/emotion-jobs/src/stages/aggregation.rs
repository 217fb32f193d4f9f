//! Aggregation: score every label of the pair and store a verdict.

use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::{info, instrument};

use emotion_core::{
    aggregate_labels, average_score, JobType, PipelineStage, SnapshotRepository, VerdictRepository,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::{outcome, Pipeline, StagePayload};

pub struct AggregationHandler {
    pipeline: Pipeline,
}

impl AggregationHandler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    async fn fail(&self, ctx: &JobContext, message: String) -> JobResult {
        self.pipeline
            .fail_stage(ctx.pipeline_id(), JobType::Aggregation, message)
            .await
    }
}

#[async_trait]
impl JobHandler for AggregationHandler {
    fn job_type(&self) -> JobType {
        JobType::Aggregation
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "aggregation", op = "execute", pipeline_id = %ctx.pipeline_id())
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let pipeline_id = ctx.pipeline_id();
        let payload: StagePayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return self.fail(&ctx, e).await,
        };

        // Every label of the pair, earlier batches included.
        let labels = match self
            .pipeline
            .snapshots
            .labels_for_pair(&payload.user_id, &payload.post_id)
            .await
        {
            Ok(labels) => labels,
            Err(e) => {
                return self
                    .fail(&ctx, format!("Failed to load labels: {}", e))
                    .await
            }
        };

        if labels.is_empty() {
            self.pipeline
                .ledger
                .record(pipeline_id, PipelineStage::NoData)
                .await;
            return JobResult::Success(Some(outcome(PipelineStage::NoData)));
        }

        let score = average_score(labels.iter().map(|l| l.as_deref()));
        let verdict = aggregate_labels(labels.iter().map(|l| l.as_deref()));

        let stored = match self
            .pipeline
            .verdicts
            .insert(&payload.user_id, &payload.post_id, verdict.as_str())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                return self
                    .fail(&ctx, format!("Failed to store verdict: {}", e))
                    .await
            }
        };

        self.pipeline
            .ledger
            .record(pipeline_id, PipelineStage::Completed)
            .await;

        info!(
            user_id = %payload.user_id,
            post_id = %payload.post_id,
            label_count = labels.len(),
            score = score.unwrap_or_default(),
            emotion = %verdict,
            verdict_id = stored.id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Verdict stored"
        );

        let mut body = outcome(PipelineStage::Completed);
        body["emotion"] = json!(verdict.as_str());
        body["label_count"] = json!(labels.len());
        body["score"] = json!(score);
        JobResult::Success(Some(body))
    }
}
