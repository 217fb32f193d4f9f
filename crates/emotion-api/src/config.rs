//! Server configuration loaded from the environment.

use axum::http::HeaderValue;
use tracing::warn;

use emotion_core::defaults;

/// Process-level settings for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub cors_origins: Vec<HeaderValue>,
    /// Whether `POST /truncate` is served.
    pub admin_reset_enabled: bool,
    /// Whether this process runs the stage worker.
    pub worker_enabled: bool,
    /// Finished stage jobs kept by the periodic queue cleanup.
    pub job_keep_count: i64,
    pub job_cleanup_interval_secs: u64,
}

impl AppConfig {
    /// Read configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `APP_NAME` | `emotion_api` |
    /// | `APP_ENV` | `development` |
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `8000` |
    /// | `DATABASE_URL` | local `emotion_db` |
    /// | `CORS_ORIGINS` | `http://localhost:5173` |
    /// | `ADMIN_RESET_ENABLED` | `true` unless `APP_ENV=production` |
    /// | `WORKER_ENABLED` | `true` |
    /// | `JOB_KEEP_COUNT` | `10000` |
    /// | `JOB_CLEANUP_INTERVAL_SECS` | `3600` |
    pub fn from_env() -> Self {
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::PORT);

        let admin_reset_enabled = std::env::var("ADMIN_RESET_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(app_env != "production");

        let worker_enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let job_keep_count = std::env::var("JOB_KEEP_COUNT")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_KEEP_COUNT)
            .max(0);

        let job_cleanup_interval_secs = std::env::var("JOB_CLEANUP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults::JOB_CLEANUP_INTERVAL_SECS);

        let origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| defaults::CORS_ORIGIN.to_string());

        Self {
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| defaults::APP_NAME.to_string()),
            app_env,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            cors_origins: parse_origins(&origins),
            admin_reset_enabled,
            worker_enabled,
            job_keep_count,
            job_cleanup_interval_secs,
        }
    }
}

/// Split a comma-separated origin list, dropping entries that are not
/// valid header values. An empty list yields the default origin.
pub fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    if raw.trim().is_empty() {
        return vec![HeaderValue::from_static(defaults::CORS_ORIGIN)];
    }

    raw.split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}
