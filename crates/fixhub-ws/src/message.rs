//! Push frame decoding.

use crate::error::StreamResult;
use fixhub_core::StreamEvent;

/// Decode one text frame into a [`StreamEvent`].
pub fn decode_frame(text: &str) -> StreamResult<StreamEvent> {
    Ok(serde_json::from_str(text)?)
}
