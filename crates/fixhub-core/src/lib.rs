//! Core domain records for the FIX hub operator console.
//!
//! This crate provides the types shared by every other component:
//! - `Connection`, `Route`: server-owned records mutated through the REST API
//! - `Session`: read-only view of an active FIX session
//! - `StreamEvent`, `Direction`: events delivered over the push channel
//! - `Credential`: bearer token plus display identity
//! - `Resource`: per-kind endpoint and local validation contract

pub mod confirm;
pub mod credential;
pub mod error;
pub mod event;
pub mod resource;
pub mod session;

pub use confirm::{ActionOutcome, AutoConfirm, Confirm};
pub use credential::Credential;
pub use error::{ValidationError, ValidationResult};
pub use event::{Direction, StreamEvent};
pub use resource::{Connection, Resource, Route, DEFAULT_CONNECTION_PORT};
pub use session::Session;
