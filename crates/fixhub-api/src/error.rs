//! API error types.

use fixhub_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad credentials, or a 401 on an authorized call.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Local field check failed; nothing was sent.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The hub rejected a create/update/delete/disconnect.
    #[error("Mutation rejected: {message}")]
    Mutation {
        status: Option<u16>,
        message: String,
    },

    /// Non-success status on a read.
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// Network failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("A {kind} mutation is already in flight")]
    MutationInFlight { kind: &'static str },

    #[error("Disconnect already in flight for session {0}")]
    DisconnectInFlight(String),

    /// The owning component was torn down; the response was discarded.
    #[error("Component torn down, response discarded")]
    TornDown,

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Invalid URL: {0}")]
    Url(String),
}

impl ApiError {
    /// Reclassify a server rejection as a mutation failure.
    pub fn into_mutation(self) -> Self {
        match self {
            Self::Server { status, message } => Self::Mutation {
                status: Some(status),
                message,
            },
            other => other,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport("request timed out".to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
