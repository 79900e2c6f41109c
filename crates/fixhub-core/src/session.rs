//! Active FIX session as reported by the hub.

use serde::{Deserialize, Serialize};

/// Read-only view of one active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "senderCompID")]
    pub sender_comp_id: String,
    #[serde(rename = "targetCompID")]
    pub target_comp_id: String,
    /// Protocol version string (e.g. `FIX.4.4`).
    #[serde(rename = "beginString", default)]
    pub begin_string: String,
    /// Composite identity as rendered by the hub.
    #[serde(rename = "toString", default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
}

impl Session {
    pub fn new(
        begin_string: impl Into<String>,
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
    ) -> Self {
        Self {
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            begin_string: begin_string.into(),
            display_id: None,
        }
    }

    /// Identity used for display and as the disconnect key.
    ///
    /// Falls back to `BEGIN:SENDER->TARGET` when the hub omits it.
    pub fn identity(&self) -> String {
        match &self.display_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!(
                "{}:{}->{}",
                self.begin_string, self.sender_comp_id, self.target_comp_id
            ),
        }
    }
}
