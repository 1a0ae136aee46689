//! Job request parsing and validation.
//!
//! Wire shape accepted by `POST /jobs`:
//!
//! ```text
//! { "id"?: string, "callback_url"?: string,
//!   "input": { "workflow": object | JSON string, "files"?: [{name, image}],
//!              "callback_url"?: string, "callback_auth_header"?: {header: value},
//!              "metadata"?: any, "upload"?: {bucket, key, cloud_type, credentials?} } }
//! ```
//!
//! Validation failures are reported synchronously; no job is created.

use std::collections::HashMap;

use relay_comfyui::engine::InputFile;
use relay_core::error::CoreError;
use relay_core::types::{new_run_id, RunId};
use relay_core::upload::UploadTarget;
use serde::Deserialize;

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Caller-chosen run id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Callback URL given outside `input` (the inner one wins).
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub input: Option<JobInput>,
}

#[derive(Debug, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub workflow: Option<serde_json::Value>,
    #[serde(default)]
    pub files: Vec<InputFile>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub callback_auth_header: Option<HashMap<String, String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub upload: Option<UploadTarget>,
}

/// A validated job, ready to run.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub run_id: RunId,
    /// Workflow graph: every top-level key is a node.
    pub workflow: serde_json::Map<String, serde_json::Value>,
    pub files: Vec<InputFile>,
    pub callback_url: Option<String>,
    pub callback_headers: HashMap<String, String>,
    pub metadata: Option<serde_json::Value>,
    pub upload: Option<UploadTarget>,
}

impl JobSpec {
    /// A job running `workflow` with no callbacks, files or upload.
    pub fn new(run_id: impl Into<RunId>, workflow: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            run_id: run_id.into(),
            workflow,
            files: Vec::new(),
            callback_url: None,
            callback_headers: HashMap::new(),
            metadata: None,
            upload: None,
        }
    }
}

impl CreateJobRequest {
    /// Validate the request and turn it into a [`JobSpec`].
    pub fn into_spec(self) -> Result<JobSpec, CoreError> {
        let input = self.input.ok_or_else(|| {
            CoreError::Validation("no 'input' property found on job data".into())
        })?;
        let workflow = parse_workflow(input.workflow)?;

        let run_id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(CoreError::Validation("'id' must not be empty".into()))
            }
            Some(id) => id,
            None => new_run_id(),
        };

        let callback_url = input.callback_url.or(self.callback_url);
        if let Some(url) = &callback_url {
            reqwest::Url::parse(url).map_err(|e| {
                CoreError::Validation(format!("'callback_url' is not a valid URL: {e}"))
            })?;
        }

        if let Some(upload) = &input.upload {
            upload.validate()?;
        }

        Ok(JobSpec {
            run_id,
            workflow,
            files: input.files,
            callback_url,
            callback_headers: input.callback_auth_header.unwrap_or_default(),
            metadata: input.metadata,
            upload: input.upload,
        })
    }
}

/// Accept a workflow given as a JSON object or as a JSON-encoded string.
pub fn parse_workflow(
    workflow: Option<serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>, CoreError> {
    let invalid = || {
        CoreError::Validation("'workflow' must be a valid JSON object or JSON-encoded string".into())
    };

    match workflow {
        None | Some(serde_json::Value::Null) => {
            Err(CoreError::Validation("'workflow' is required".into()))
        }
        Some(serde_json::Value::Object(map)) => Ok(map),
        Some(serde_json::Value::String(text)) => {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(serde_json::Value::Object(map)) => Ok(map),
                _ => Err(invalid()),
            }
        }
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn request(value: serde_json::Value) -> CreateJobRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn workflow_object_is_accepted() {
        let spec = request(json!({"input": {"workflow": {"3": {}, "4": {}}}}))
            .into_spec()
            .unwrap();
        assert_eq!(spec.workflow.len(), 2);
        assert!(!spec.run_id.is_empty());
    }

    #[test]
    fn workflow_string_is_parsed() {
        let spec = request(json!({"id": "run-1", "input": {"workflow": "{\"1\": {}}"}}))
            .into_spec()
            .unwrap();
        assert_eq!(spec.run_id, "run-1");
        assert!(spec.workflow.contains_key("1"));
    }

    #[test]
    fn unparseable_workflow_is_rejected() {
        for workflow in [json!("{not json"), json!("[1,2]"), json!(42), json!([{"a": 1}])] {
            let result = request(json!({"input": {"workflow": workflow}})).into_spec();
            assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("valid JSON object"));
        }
    }

    #[test]
    fn missing_input_or_workflow_is_rejected() {
        assert_matches!(request(json!({})).into_spec(), Err(CoreError::Validation(_)));
        assert_matches!(
            request(json!({"input": {}})).into_spec(),
            Err(CoreError::Validation(msg)) if msg.contains("required")
        );
    }

    #[test]
    fn inner_callback_url_wins() {
        let spec = request(json!({
            "callback_url": "https://outer.example/cb",
            "input": {
                "workflow": {"1": {}},
                "callback_url": "https://inner.example/cb",
                "callback_auth_header": {"Authorization": "Bearer t"}
            }
        }))
        .into_spec()
        .unwrap();
        assert_eq!(spec.callback_url.as_deref(), Some("https://inner.example/cb"));
        assert_eq!(spec.callback_headers["Authorization"], "Bearer t");
    }

    #[test]
    fn outer_callback_url_is_used_when_inner_missing() {
        let spec = request(json!({
            "callback_url": "https://outer.example/cb",
            "input": {"workflow": {"1": {}}}
        }))
        .into_spec()
        .unwrap();
        assert_eq!(spec.callback_url.as_deref(), Some("https://outer.example/cb"));
    }

    #[test]
    fn invalid_callback_url_is_rejected() {
        let result = request(json!({"input": {"workflow": {"1": {}}, "callback_url": "not a url"}}))
            .into_spec();
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn upload_target_is_validated() {
        let result = request(json!({
            "input": {"workflow": {"1": {}}, "upload": {"bucket": "", "key": "k"}}
        }))
        .into_spec();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("bucket"));
    }
}
