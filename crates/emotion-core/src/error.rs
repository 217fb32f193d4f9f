//! Error types for the emotion pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a stage, repository or classifier can fail with.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference error: {0}")]
    Inference(String),

    /// Stored payload was not base64, or the bytes were not an image.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Job error: {0}")]
    Job(String),

    /// Redis status write or read. Stages treat these as non-fatal.
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
