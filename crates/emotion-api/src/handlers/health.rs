//! Liveness and dependency health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::warn;

use emotion_core::EmotionClassifier;
use emotion_db::log_pool_metrics;

use crate::AppState;

pub async fn home() -> impl IntoResponse {
    Json(json!({ "message": "Hello, World!" }))
}

/// Reports database and classifier reachability.
///
/// Responds 503 when the database is down; an unreachable classifier only
/// degrades the status since submissions still queue.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let pool_stats = state.pool.as_ref().map(log_pool_metrics);
    let database = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "ok",
            Err(e) => {
                warn!(subsystem = "api", component = "health", error = %e, "Database check failed");
                "unavailable"
            }
        },
        None => "memory",
    };

    let classifier = match state.pipeline.classifier.health_check().await {
        Ok(true) => "ok",
        Ok(false) => "unavailable",
        Err(e) => {
            warn!(subsystem = "api", component = "health", error = %e, "Classifier check failed");
            "unavailable"
        }
    };

    let (code, status) = match (database, classifier) {
        ("unavailable", _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (_, "unavailable") => (StatusCode::OK, "degraded"),
        _ => (StatusCode::OK, "healthy"),
    };

    (
        code,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "database": database,
            "pool": pool_stats,
            "classifier": classifier,
            "model": state.pipeline.classifier.model_name(),
            "ledger": state.pipeline.ledger.backend(),
        })),
    )
}
