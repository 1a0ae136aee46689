//! Event normalizer: raw engine payloads in, typed events out.
//!
//! Payloads arrive either already structured or as text that may or may
//! not be valid JSON. Normalization never fails: unparseable text becomes
//! an [`EngineEvent::Invalid`] marker carrying the original data, and
//! structured records the engine vocabulary does not cover become
//! [`EngineEvent::Unrecognized`].

use serde::{Deserialize, Serialize};

use crate::messages::ComfyUIMessage;

/// Error label carried by parse-failure markers.
pub const INVALID_JSON: &str = "Invalid JSON";

/// A payload exactly as the engine emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Text(String),
    Structured(serde_json::Value),
}

impl From<String> for RawEvent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawEvent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for RawEvent {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Marker produced for text that is not valid JSON.
///
/// Serializes as `{"error": "Invalid JSON", "raw_data": "<original>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidPayload {
    pub error: &'static str,
    pub raw_data: String,
}

/// A normalized engine event.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A message in the engine's known vocabulary.
    Message(ComfyUIMessage),
    /// Valid JSON that is not a known engine message.
    Unrecognized(serde_json::Value),
    /// Text that could not be parsed at all.
    Invalid(InvalidPayload),
}

impl EngineEvent {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Normalize a raw payload. Never panics and never returns an error.
pub fn normalize(raw: RawEvent) -> EngineEvent {
    let value = match raw {
        RawEvent::Structured(value) => value,
        RawEvent::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => value,
            Err(_) => {
                return EngineEvent::Invalid(InvalidPayload {
                    error: INVALID_JSON,
                    raw_data: text,
                })
            }
        },
    };

    match ComfyUIMessage::deserialize(&value) {
        Ok(message) => EngineEvent::Message(message),
        Err(e) => {
            tracing::trace!(error = %e, "Structured event outside the engine vocabulary");
            EngineEvent::Unrecognized(value)
        }
    }
}
