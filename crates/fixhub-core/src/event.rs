//! Stream events delivered over the push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Message flow direction relative to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    FromClient,
    ToClient,
    FromServer,
    ToServer,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromClient => write!(f, "FROM_CLIENT"),
            Self::ToClient => write!(f, "TO_CLIENT"),
            Self::FromServer => write!(f, "FROM_SERVER"),
            Self::ToServer => write!(f, "TO_SERVER"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One in-flight protocol message observed by the hub. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Event type (`incoming` / `outgoing`).
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(rename = "senderCompID", default, deserialize_with = "null_as_default")]
    pub sender_comp_id: String,
    #[serde(rename = "targetCompID", default, deserialize_with = "null_as_default")]
    pub target_comp_id: String,
    /// FIX MsgType code (tag 35).
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_type: String,
    /// Raw message body (opaque).
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_body: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub direction: Direction,
}

impl StreamEvent {
    /// Hub timestamp as a UTC datetime, if representable.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// The hub serializes absent fields as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
