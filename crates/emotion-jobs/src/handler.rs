//! The contract between the worker and each pipeline stage.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use emotion_core::{Job, JobType};

type ProgressFn = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// A claimed job plus the worker's progress sink.
pub struct JobContext {
    pub job: Job,
    on_progress: Option<ProgressFn>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            on_progress: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// No-op when the worker did not attach a sink.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(sink) = &self.on_progress {
            sink(percent, message);
        }
    }

    /// Id of the submission this job belongs to.
    pub fn pipeline_id(&self) -> Uuid {
        self.job.pipeline_id
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }

    /// Deserialize the payload into `T`.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, String> {
        let payload = self
            .payload()
            .ok_or_else(|| format!("{} job has no payload", self.job.job_type.as_str()))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| format!("Invalid {} payload: {}", self.job.job_type.as_str(), e))
    }
}

/// How a stage run ended. The body of `Success` is stored as the queue row's result.
#[derive(Debug)]
pub enum JobResult {
    Success(Option<JsonValue>),
    /// Never retried.
    Failed(String),
    /// Requeued while `retry_count < max_retries`.
    Retry(String),
}

/// One pipeline stage. The worker routes claimed jobs by [`JobHandler::job_type`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(&self, ctx: JobContext) -> JobResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotion_core::JobStatus;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn job(payload: Option<JsonValue>) -> Job {
        let id = Uuid::new_v4();
        Job {
            id,
            pipeline_id: id,
            job_type: JobType::Intake,
            status: JobStatus::Running,
            priority: 2,
            payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[derive(Debug, Deserialize)]
    struct Pair {
        user_id: String,
        post_id: String,
    }

    #[test]
    fn test_job_context_pipeline_id() {
        let job = job(None);
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.pipeline_id(), job.pipeline_id);
        assert!(ctx.payload().is_none());
    }

    #[test]
    fn test_parse_payload() {
        let ctx = JobContext::new(job(Some(json!({"user_id": "u1", "post_id": "p1"}))));
        let pair: Pair = ctx.parse_payload().unwrap();
        assert_eq!(pair.user_id, "u1");
        assert_eq!(pair.post_id, "p1");
    }

    #[test]
    fn test_parse_payload_missing() {
        let ctx = JobContext::new(job(None));
        let err = ctx.parse_payload::<Pair>().unwrap_err();
        assert!(err.contains("no payload"));
    }

    #[test]
    fn test_parse_payload_wrong_shape() {
        let ctx = JobContext::new(job(Some(json!({"user_id": 7}))));
        let err = ctx.parse_payload::<Pair>().unwrap_err();
        assert!(err.starts_with("Invalid intake payload"));
    }

    #[test]
    fn test_report_progress_invokes_callback() {
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        let ctx = JobContext::new(job(None)).with_progress_callback(move |percent, _| {
            seen_clone.store(percent, Ordering::SeqCst);
        });
        ctx.report_progress(42, Some("halfway"));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_report_progress_without_callback_is_noop() {
        let ctx = JobContext::new(job(None));
        ctx.report_progress(100, None);
    }
}
