//! Event stream consumer for the FIX hub console.
//!
//! Keeps one push connection to the hub's `/ws/messages` feed:
//! - Connecting / Open / Closed state with a liveness flag
//! - Bounded most-recent-first event buffer (100 events)
//! - Malformed frames dropped without closing the connection
//! - Ping heartbeat and optional reconnection with exponential backoff

pub mod buffer;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;

pub use buffer::{EventBuffer, DEFAULT_CAPACITY};
pub use connection::{
    EventStreamConsumer, ReconnectPolicy, StreamConfig, StreamHandle, StreamState, StreamStats,
};
pub use error::{StreamError, StreamResult};
pub use message::decode_frame;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
