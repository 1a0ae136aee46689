//! Per-job upload configuration.
//!
//! Wire shape: `{"bucket": "...", "key": "...", "cloud_type": "GCP"|"AWS",
//! "credentials"?: {...}}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Object-storage backend selected per upload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudType {
    /// Bucket/object-key backend (Google Cloud Storage).
    #[default]
    #[serde(rename = "GCP")]
    Gcp,
    /// S3-compatible backend.
    #[serde(rename = "AWS")]
    Aws,
}

impl CloudType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gcp => "GCP",
            Self::Aws => "AWS",
        }
    }
}

/// Where a job's artifacts should be uploaded.
#[derive(Clone, Serialize, Deserialize)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub cloud_type: CloudType,
    /// Explicit credentials; when absent the resolver chain decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<serde_json::Value>,
}

impl UploadTarget {
    /// Reject targets that cannot possibly be uploaded to.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.bucket.trim().is_empty() {
            return Err(CoreError::Validation(
                "upload.bucket must be a non-empty string".into(),
            ));
        }
        if self.key.trim().is_empty() {
            return Err(CoreError::Validation(
                "upload.key must be a non-empty string".into(),
            ));
        }
        if let Some(creds) = &self.credentials {
            if !creds.is_object() {
                return Err(CoreError::Validation(
                    "upload.credentials must be a JSON object".into(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("cloud_type", &self.cloud_type)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_shape() {
        let target: UploadTarget = serde_json::from_value(json!({
            "bucket": "media",
            "key": "renders/out.jpg",
            "cloud_type": "AWS",
        }))
        .unwrap();
        assert_eq!(target.cloud_type, CloudType::Aws);
        assert!(target.credentials.is_none());
        assert!(target.validate().is_ok());
    }

    #[test]
    fn cloud_type_defaults_to_gcp() {
        let target: UploadTarget =
            serde_json::from_value(json!({"bucket": "b", "key": "k"})).unwrap();
        assert_eq!(target.cloud_type, CloudType::Gcp);
        assert_eq!(CloudType::default(), CloudType::Gcp);
    }

    #[test]
    fn unknown_cloud_type_is_rejected() {
        let result: Result<UploadTarget, _> =
            serde_json::from_value(json!({"bucket": "b", "key": "k", "cloud_type": "AZURE"}));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let target = UploadTarget {
            bucket: " ".into(),
            key: "k".into(),
            cloud_type: CloudType::Gcp,
            credentials: None,
        };
        assert!(target.validate().is_err());

        let target = UploadTarget {
            bucket: "b".into(),
            key: "k".into(),
            cloud_type: CloudType::Gcp,
            credentials: Some(json!("not-an-object")),
        };
        assert!(target.validate().is_err());
    }

    #[test]
    fn debug_redacts_credentials() {
        let target = UploadTarget {
            bucket: "b".into(),
            key: "k".into(),
            cloud_type: CloudType::Aws,
            credentials: Some(json!({"secret_access_key": "hunter2"})),
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
