//! REST synchronization layer for the FIX hub console.
//!
//! Keeps server-owned resource sets visible and mutable from one operator
//! session:
//! - `HubClient`: bearer-authenticated JSON transport with bounded timeouts
//! - `CredentialHolder`: sole owner of the bearer credential
//! - `ResourceSynchronizer<T>`: cached list + serialized create/update/delete
//! - `SessionMonitor`: interval polling and per-session disconnect

pub mod client;
pub mod credentials;
pub mod error;
pub mod sessions;
pub mod synchronizer;

pub use client::HubClient;
pub use credentials::{
    CredentialHolder, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{ApiError, ApiResult};
pub use sessions::{SessionMonitor, SessionMonitorConfig};
pub use synchronizer::{ConnectionSynchronizer, ResourceSynchronizer, RouteSynchronizer};
