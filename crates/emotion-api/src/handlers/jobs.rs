//! Submission status.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use emotion_jobs::PipelineStatus;

use crate::{ApiError, AppState};

pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<PipelineStatus>, ApiError> {
    state
        .pipeline
        .status(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))
}
