//! Job status payloads and artifact descriptors.
//!
//! A [`CallbackPayload`] is the single record every sink receives:
//! `{"run_id", "status", "data", "metadata"?}`. The shape of `data`
//! depends on the status (see [`StatusData`]).

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::RunId;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` are terminal: no transition follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// An output file emitted by the engine.
///
/// `name` is the filename reported by the engine, `path` its location on
/// the local data volume (absolute) or relative to the engine output
/// directory, depending on deployment mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: String,
    /// `None` until uploaded. After upload, `Some(None)` means the object
    /// was stored but no public URL can be derived for it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub url: Option<Option<String>>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            url: None,
        }
    }

    /// Mark the artifact as uploaded, with the resulting URL if known.
    pub fn uploaded(mut self, url: Option<String>) -> Self {
        self.url = Some(url);
        self
    }

    pub fn is_uploaded(&self) -> bool {
        self.url.is_some()
    }
}

/// Distinguish an explicit `null` (uploaded, URL unknown) from a missing field.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

// ---------------------------------------------------------------------------
// StatusData
// ---------------------------------------------------------------------------

/// Status-dependent `data` field of a [`CallbackPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusData {
    /// `{progress: 100, output: [...]}` once completed.
    Completed { progress: u8, output: Vec<Artifact> },
    /// `{progress: n}` while processing.
    Progress { progress: u8 },
    /// `{error: "..."}` on failure.
    Failed { error: String },
}

// ---------------------------------------------------------------------------
// CallbackPayload
// ---------------------------------------------------------------------------

/// A status update for one run, as stored and delivered to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub run_id: RunId,
    pub status: JobStatus,
    pub data: StatusData,
    /// Opaque caller metadata, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CallbackPayload {
    pub fn processing(run_id: impl Into<RunId>, progress: u8) -> Self {
        Self {
            run_id: run_id.into(),
            status: JobStatus::Processing,
            data: StatusData::Progress {
                progress: progress.min(100),
            },
            metadata: None,
        }
    }

    pub fn completed(run_id: impl Into<RunId>, output: Vec<Artifact>) -> Self {
        Self {
            run_id: run_id.into(),
            status: JobStatus::Completed,
            data: StatusData::Completed {
                progress: 100,
                output,
            },
            metadata: None,
        }
    }

    pub fn failed(run_id: impl Into<RunId>, error: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: JobStatus::Failed,
            data: StatusData::Failed {
                error: error.into(),
            },
            metadata: None,
        }
    }

    /// Attach caller metadata (no-op for `None`).
    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Progress carried by the payload, if any (`failed` carries none).
    pub fn progress(&self) -> Option<u8> {
        match &self.data {
            StatusData::Progress { progress } | StatusData::Completed { progress, .. } => {
                Some(*progress)
            }
            StatusData::Failed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn processing_payload_wire_shape() {
        let payload = CallbackPayload::processing("run-1", 42);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"run_id": "run-1", "status": "processing", "data": {"progress": 42}})
        );
    }

    #[test]
    fn processing_progress_is_clamped() {
        let payload = CallbackPayload::processing("run-1", 250);
        assert_eq!(payload.progress(), Some(100));
    }

    #[test]
    fn failed_payload_has_error_and_no_progress() {
        let payload = CallbackPayload::failed("run-2", "boom");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["data"], json!({"error": "boom"}));
        assert!(payload.progress().is_none());
    }

    #[test]
    fn completed_payload_serializes_upload_states() {
        let output = vec![
            Artifact::new("a.png", "/data/a.png"),
            Artifact::new("b.jpg", "/data/b.jpg").uploaded(Some("https://x/b.jpg".into())),
            Artifact::new("c.jpg", "/data/c.jpg").uploaded(None),
        ];
        let payload = CallbackPayload::completed("run-3", output)
            .with_metadata(Some(json!({"order": 7})));
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["data"]["progress"], 100);
        assert!(value["data"]["output"][0].get("url").is_none());
        assert_eq!(value["data"]["output"][1]["url"], "https://x/b.jpg");
        assert!(value["data"]["output"][2]["url"].is_null());
        assert!(value["data"]["output"][2].get("url").is_some());
        assert_eq!(value["metadata"], json!({"order": 7}));
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = CallbackPayload::completed(
            "run-4",
            vec![Artifact::new("c.jpg", "c.jpg").uploaded(None)],
        );
        let text = serde_json::to_string(&payload).unwrap();
        let back: CallbackPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn untagged_data_prefers_completed_shape() {
        let data: StatusData =
            serde_json::from_value(json!({"progress": 100, "output": []})).unwrap();
        assert_matches!(data, StatusData::Completed { progress: 100, .. });

        let data: StatusData = serde_json::from_value(json!({"progress": 3})).unwrap();
        assert_matches!(data, StatusData::Progress { progress: 3 });
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!(JobStatus::Failed.as_str(), "failed");
    }
}
