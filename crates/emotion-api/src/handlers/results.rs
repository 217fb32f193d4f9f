//! Aggregated verdict listing.

use axum::extract::{Query, State};
use axum::Json;

use emotion_core::{VerdictFilter, VerdictRepository, VerdictSummary};

use crate::{ApiError, AppState};

/// Verdicts ordered by post id. Blank filters are ignored.
pub async fn list_emotions(
    State(state): State<AppState>,
    Query(filter): Query<VerdictFilter>,
) -> Result<Json<Vec<VerdictSummary>>, ApiError> {
    let filter = VerdictFilter {
        user_id: filter.user_id.filter(|s| !s.trim().is_empty()),
        post_id: filter.post_id.filter(|s| !s.trim().is_empty()),
    };
    let rows = state.pipeline.verdicts.list(&filter).await?;
    Ok(Json(rows))
}
