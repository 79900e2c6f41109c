//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Api(#[from] fixhub_api::ApiError),

    #[error("Stream error: {0}")]
    Stream(#[from] fixhub_ws::StreamError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] fixhub_telemetry::TelemetryError),

    #[error("Not logged in")]
    LoggedOut,

    #[error("No route at index {0}")]
    NoSuchRoute(usize),
}

impl AppError {
    /// Whether the failure means the operator must log in again.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::LoggedOut => true,
            Self::Api(e) => e.is_auth(),
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
