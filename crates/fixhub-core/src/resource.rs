//! Server-owned records that the console can create, update and delete.
//!
//! Each record kind implements [`Resource`], which names its REST collection
//! and performs the local field checks that must pass before a request is
//! sent.

use crate::error::{ValidationError, ValidationResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Port pre-filled on the connection form.
pub const DEFAULT_CONNECTION_PORT: u16 = 9878;

/// A server-managed collection with create/update/delete endpoints.
pub trait Resource:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identity used to address a single record in update/delete requests.
    type Id: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static;

    /// Collection name, used in logs and metrics labels.
    const KIND: &'static str;

    /// Singular noun used in operator prompts.
    const NOUN: &'static str;

    /// Path segments of the collection endpoint (e.g. `["api", "routes"]`).
    const COLLECTION: &'static [&'static str];

    /// Check required fields before any request is issued.
    fn validate(&self) -> ValidationResult<()>;
}

/// Upstream/downstream FIX connection definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Server-assigned identity. `None` on drafts that were never saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub port: u16,
    /// Path of the QuickFIX settings file on the hub host (opaque).
    #[serde(default)]
    pub settings_file: String,
}

impl Connection {
    /// Create an unsaved connection draft.
    pub fn draft(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        settings_file: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            host: host.into(),
            port,
            settings_file: settings_file.into(),
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::draft("", "", DEFAULT_CONNECTION_PORT, "")
    }
}

impl Resource for Connection {
    type Id = String;

    const KIND: &'static str = "connections";
    const NOUN: &'static str = "connection";
    const COLLECTION: &'static [&'static str] = &["api", "connections"];

    fn validate(&self) -> ValidationResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::required("name"));
        }
        if self.port == 0 {
            return Err(ValidationError::new("port", "must be between 1 and 65535"));
        }
        Ok(())
    }
}

/// Routing rule. Identity is positional: the rule's current index in the
/// server's ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Source identifier (incoming side).
    pub from: String,
    /// Destination identifier (outgoing side).
    pub to: String,
    /// Optional FIX tag number inspected by the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_tag: Option<u32>,
    /// Optional value the tag must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_value: Option<String>,
}

impl Route {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition_tag: None,
            condition_value: None,
        }
    }

    /// Attach a `tag = value` condition.
    pub fn with_condition(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.condition_tag = Some(tag);
        self.condition_value = Some(value.into());
        self
    }
}

impl Resource for Route {
    type Id = usize;

    const KIND: &'static str = "routes";
    const NOUN: &'static str = "route";
    const COLLECTION: &'static [&'static str] = &["api", "routes"];

    fn validate(&self) -> ValidationResult<()> {
        if self.from.trim().is_empty() {
            return Err(ValidationError::required("from"));
        }
        if self.to.trim().is_empty() {
            return Err(ValidationError::required("to"));
        }
        Ok(())
    }
}
