//! Snapshot submission and raw snapshot reads.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use emotion_core::{SnapshotRepository, SnapshotView};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SubmitSnapshotsRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "postId")]
    pub post_id: String,
    /// Base64 images, optionally with a `data:image/...;base64,` prefix.
    pub snapshots: Vec<String>,
}

/// Both ids are required.
#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub user_id: String,
    pub post_id: String,
}

/// Queue a snapshot batch. Returns before any stage runs.
pub async fn submit_snapshots(
    State(state): State<AppState>,
    Json(body): Json<SubmitSnapshotsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.snapshots.is_empty() {
        return Err(ApiError::BadRequest("No snapshots provided".to_string()));
    }

    let job_id = state
        .pipeline
        .submit(&body.user_id, &body.post_id, body.snapshots)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "message": "Snapshots accepted for processing",
        })),
    ))
}

/// Every stored snapshot of a pair with its label.
pub async fn get_pair_snapshots(
    State(state): State<AppState>,
    Query(query): Query<PairQuery>,
) -> Result<Json<Vec<SnapshotView>>, ApiError> {
    let rows = state
        .pipeline
        .snapshots
        .list_for_pair(&query.user_id, &query.post_id)
        .await?;

    if rows.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No snapshots found for user {} and post {}",
            query.user_id, query.post_id
        )));
    }

    info!(
        subsystem = "api",
        component = "snapshots",
        user_id = %query.user_id,
        post_id = %query.post_id,
        snapshot_count = rows.len(),
        "Snapshots read"
    );
    Ok(Json(rows.into_iter().map(SnapshotView::from).collect()))
}
