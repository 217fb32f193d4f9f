//! Classification: label every unlabeled snapshot of the pair.

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::time::Instant;
use tracing::{info, instrument, trace, warn};

use emotion_core::aggregate::UNKNOWN_LABEL;
use emotion_core::{
    EmotionClassifier, Error, JobType, LabelUpdate, PipelineStage, Result, Snapshot,
    SnapshotRepository,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::{outcome, Pipeline, StagePayload};

pub struct ClassificationHandler {
    pipeline: Pipeline,
}

impl ClassificationHandler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    async fn fail(&self, ctx: &JobContext, message: String) -> JobResult {
        self.pipeline
            .fail_stage(ctx.pipeline_id(), JobType::Classification, message)
            .await
    }

    /// Decode the stored payload and run the classifier on it.
    async fn classify_one(&self, snapshot: &Snapshot) -> Result<String> {
        let image = base64::engine::general_purpose::STANDARD
            .decode(snapshot.snapshot.trim())
            .map_err(|e| Error::Decode(format!("Snapshot is not valid base64: {}", e)))?;
        let label = self.pipeline.classifier.classify(&image).await?;
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return Err(Error::Inference("Classifier returned an empty label".to_string()));
        }
        Ok(label)
    }
}

#[async_trait]
impl JobHandler for ClassificationHandler {
    fn job_type(&self) -> JobType {
        JobType::Classification
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "classification", op = "execute", pipeline_id = %ctx.pipeline_id())
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let pipeline_id = ctx.pipeline_id();
        let payload: StagePayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return self.fail(&ctx, e).await,
        };

        self.pipeline
            .ledger
            .record(pipeline_id, PipelineStage::Analyzing)
            .await;

        let rows = match self
            .pipeline
            .snapshots
            .list_unlabeled(&payload.user_id, &payload.post_id)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                return self
                    .fail(&ctx, format!("Failed to load snapshots: {}", e))
                    .await
            }
        };

        if rows.is_empty() {
            info!(
                user_id = %payload.user_id,
                post_id = %payload.post_id,
                "No unlabeled snapshots left for pair"
            );
            self.pipeline
                .ledger
                .record(pipeline_id, PipelineStage::NoData)
                .await;
            return JobResult::Success(Some(outcome(PipelineStage::NoData)));
        }

        let total = rows.len();
        let mut updates = Vec::with_capacity(total);
        let mut failed = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let emotion = match self.classify_one(row).await {
                Ok(label) => label,
                Err(e) => {
                    warn!(
                        snapshot_id = row.id,
                        error = %e,
                        "Classification failed, labeling snapshot unknown"
                    );
                    failed.push(json!({ "snapshot_id": row.id, "error": e.to_string() }));
                    UNKNOWN_LABEL.to_string()
                }
            };
            trace!(snapshot_id = row.id, emotion = %emotion, "Snapshot classified");
            updates.push(LabelUpdate {
                snapshot_id: row.id,
                emotion,
            });
            ctx.report_progress(((idx + 1) * 90 / total) as i32, None);
        }

        let labeled = match self.pipeline.snapshots.apply_labels(&updates).await {
            Ok(n) => n,
            Err(e) => {
                return self
                    .fail(&ctx, format!("Failed to commit labels: {}", e))
                    .await
            }
        };

        self.pipeline
            .ledger
            .record(pipeline_id, PipelineStage::Aggregating)
            .await;

        if let Err(e) = self
            .pipeline
            .schedule(pipeline_id, JobType::Aggregation, &payload.pair_only())
            .await
        {
            return self
                .fail(&ctx, format!("Failed to queue aggregation: {}", e))
                .await;
        }

        info!(
            user_id = %payload.user_id,
            post_id = %payload.post_id,
            snapshot_count = total,
            labeled,
            unknown = failed.len(),
            model = self.pipeline.classifier.model_name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Snapshots classified"
        );

        let mut body = outcome(PipelineStage::Aggregating);
        body["labeled"] = json!(labeled);
        body["unknown"] = json!(failed.len());
        if !failed.is_empty() {
            body["failed"] = json!(failed);
        }
        JobResult::Success(Some(body))
    }
}
