//! Error types for the batch job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sync error: {0}")]
    Sync(#[from] zepp_client::ZeppError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("InfluxDB write failed (HTTP {status}): {body}")]
    Write { status: u16, body: String },
}

/// Result type alias for the batch job.
pub type AppResult<T> = Result<T, AppError>;
