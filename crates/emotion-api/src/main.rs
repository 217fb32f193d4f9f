//! emotion-api - HTTP API server for the emotion pipeline

mod config;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use emotion_core::JobRepository;
use emotion_db::{Database, PoolConfig};
use emotion_inference::HttpEmotionBackend;
use emotion_jobs::{Ledger, Pipeline, WorkerBuilder, WorkerConfig, WorkerHandle};

use config::AppConfig;

/// Request bodies carry whole image batches.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    /// Present when backed by Postgres; used by the health check.
    pool: Option<PgPool>,
    admin_reset_enabled: bool,
}

// =============================================================================
// ROUTER
// =============================================================================

fn build_router(state: AppState, cors_origins: Vec<axum::http::HeaderValue>) -> Router {
    Router::new()
        .route("/", get(handlers::health::home))
        .route("/health", get(handlers::health::health_check))
        .route("/snapshots", post(handlers::snapshots::submit_snapshots))
        .route("/jobs/:id", get(handlers::jobs::get_job_status))
        .route("/emotions", get(handlers::results::list_emotions))
        .route("/emotion", get(handlers::snapshots::get_pair_snapshots))
        .route("/truncate", post(handlers::admin::truncate_all))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "emotion_api=debug,emotion_jobs=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("emotion-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = AppConfig::from_env();
    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        admin_reset_enabled = config.admin_reset_enabled,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let classifier = HttpEmotionBackend::from_env();
    info!(base_url = classifier.base_url(), "Classifier backend configured");

    let ledger = Ledger::from_env().await;
    let pipeline = Pipeline::new(
        Arc::new(db.snapshots.clone()),
        Arc::new(db.verdicts.clone()),
        Arc::new(db.jobs.clone()),
        Arc::new(classifier),
        ledger,
    );

    let worker_config = WorkerConfig::from_env();
    let worker_handle: Option<WorkerHandle> = if config.worker_enabled && worker_config.enabled {
        info!(
            max_concurrent = worker_config.max_concurrent_jobs,
            poll_interval_ms = worker_config.poll_interval_ms,
            "Starting job worker..."
        );
        let worker = pipeline
            .register_handlers(WorkerBuilder::new(Arc::new(db.jobs.clone())))
            .with_config(worker_config)
            .with_notify(db.jobs.job_notify())
            .build()
            .await;
        Some(worker.start())
    } else {
        info!("Job worker disabled; submissions will queue until a worker runs");
        None
    };

    let cleanup = spawn_queue_cleanup(
        Arc::new(db.jobs.clone()),
        config.job_keep_count,
        Duration::from_secs(config.job_cleanup_interval_secs),
    );

    let state = AppState {
        pipeline,
        pool: Some(db.pool.clone()),
        admin_reset_enabled: config.admin_reset_enabled,
    };
    let app = build_router(state, config.cors_origins.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.shutdown().await {
            error!(error = %e, "Worker shutdown failed");
        }
    }
    info!("Server stopped");
    Ok(())
}

/// Periodically prune finished stage jobs so the queue table stays bounded.
fn spawn_queue_cleanup(
    jobs: Arc<dyn JobRepository>,
    keep_count: i64,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match jobs.cleanup(keep_count).await {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(subsystem = "api", component = "cleanup", removed, keep_count, "Pruned finished jobs")
                }
                Err(e) => {
                    warn!(subsystem = "api", component = "cleanup", error = %e, "Job queue cleanup failed")
                }
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Internal(emotion_core::Error),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
}

impl From<emotion_core::Error> for ApiError {
    fn from(err: emotion_core::Error) -> Self {
        match err {
            emotion_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            emotion_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
