//! Administrative reset.

use axum::extract::State;
use axum::Json;
use serde_json::json;
use tracing::warn;

use emotion_core::SnapshotRepository;

use crate::{ApiError, AppState};

/// Delete every user, post, snapshot, verdict, and stage job.
pub async fn truncate_all(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.admin_reset_enabled {
        return Err(ApiError::Forbidden(
            "Administrative reset is disabled".to_string(),
        ));
    }

    state.pipeline.snapshots.truncate_all().await?;
    warn!(subsystem = "api", component = "admin", op = "truncate", "All tables truncated");

    Ok(Json(json!({ "message": "All tables truncated" })))
}
