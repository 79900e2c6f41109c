//! Event stream error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Max reconnection attempts reached ({0})")]
    ReconnectExhausted(u32),

    #[error("Frame decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
