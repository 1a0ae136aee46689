use std::path::PathBuf;
use std::time::Duration;

use relay_cloud::s3::{S3Settings, DEFAULT_REGION};
use relay_core::error::CoreError;

/// Deployment flavour; `development` logs host status updates instead of
/// pushing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Where deployment-wide status updates go besides the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostReporting {
    /// Not running under a managed runtime.
    Disabled,
    /// Managed runtime in development: log instead of pushing.
    Log,
    /// Push to the host's progress endpoint (`$ID` is the run id).
    Push {
        url: String,
        api_key: Option<String>,
    },
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub environment: Environment,
    /// Managed runtime name (`CLOUD_TYPE`), if any.
    pub cloud_type: Option<String>,
    pub host_reporting: HostReporting,
    /// Engine base URL (default: `http://127.0.0.1:8188`).
    pub comfyui_url: String,
    /// Data-volume root (`FS_PATH` + `DATA_PATH`); artifacts resolve to
    /// relative `subfolder/filename` paths when unset.
    pub data_path: Option<PathBuf>,
    /// Raw base64 `GCP_CREDENTIALS`.
    pub gcp_credentials: Option<String>,
    /// Raw base64 `AWS_CREDENTIALS`.
    pub aws_credentials: Option<String>,
    /// Ambient GCS key file (`GOOGLE_APPLICATION_CREDENTIALS`).
    pub gcs_key_file: Option<PathBuf>,
    pub s3: S3Settings,
    /// Status entries expire this long after their last update.
    pub status_ttl_secs: i64,
    /// Maximum number of tracked runs.
    pub status_capacity: usize,
    pub engine_timeout: Option<Duration>,
    pub upload_timeout: Option<Duration>,
    /// Per-request timeout for callback and host progress deliveries.
    pub callback_timeout: Duration,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("WorkerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("environment", &self.environment)
            .field("cloud_type", &self.cloud_type)
            .field("comfyui_url", &self.comfyui_url)
            .field("data_path", &self.data_path)
            .field("gcp_credentials", &redacted(&self.gcp_credentials))
            .field("aws_credentials", &redacted(&self.aws_credentials))
            .field("gcs_key_file", &self.gcs_key_file)
            .field("s3", &self.s3)
            .field("status_ttl_secs", &self.status_ttl_secs)
            .field("status_capacity", &self.status_capacity)
            .field("engine_timeout", &self.engine_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .field("callback_timeout", &self.callback_timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                          | Default                  |
    /// |----------------------------------|--------------------------|
    /// | `HOST`                           | `0.0.0.0`                |
    /// | `PORT`                           | `8000`                   |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                     |
    /// | `ENV`                            | `production`             |
    /// | `CLOUD_TYPE`                     | --                       |
    /// | `HOST_PROGRESS_URL`              | --                       |
    /// | `HOST_API_KEY`                   | --                       |
    /// | `COMFYUI_URL`                    | `http://127.0.0.1:8188`  |
    /// | `FS_PATH`, `DATA_PATH`           | --                       |
    /// | `GCP_CREDENTIALS`                | --                       |
    /// | `AWS_CREDENTIALS`                | --                       |
    /// | `GOOGLE_APPLICATION_CREDENTIALS` | --                       |
    /// | `S3_REGION`                      | `us-east-1`              |
    /// | `S3_ENDPOINT_URL`                | --                       |
    /// | `S3_PUBLIC_BASE_URL`             | --                       |
    /// | `STATUS_TTL_SECS`                | `86400`                  |
    /// | `STATUS_CAPACITY`                | `10000`                  |
    /// | `ENGINE_TIMEOUT_SECS`            | -- (no timeout)          |
    /// | `UPLOAD_TIMEOUT_SECS`            | -- (no timeout)          |
    /// | `CALLBACK_TIMEOUT_SECS`          | `10`                     |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match var("ENV").as_deref() {
            Some("development") => Environment::Development,
            _ => Environment::Production,
        };
        let cloud_type = var("CLOUD_TYPE");

        let host_reporting = match (&cloud_type, environment) {
            (None, _) => HostReporting::Disabled,
            (Some(_), Environment::Development) => HostReporting::Log,
            (Some(runtime), Environment::Production) => match var("HOST_PROGRESS_URL") {
                Some(url) => HostReporting::Push {
                    url,
                    api_key: var("HOST_API_KEY"),
                },
                None => {
                    return Err(CoreError::Validation(format!(
                        "HOST_PROGRESS_URL must be set when CLOUD_TYPE={runtime} in production"
                    )))
                }
            },
        };

        let data_path = match (var("FS_PATH"), var("DATA_PATH")) {
            (None, None) => None,
            (fs, data) => Some(PathBuf::from(format!(
                "{}{}",
                fs.unwrap_or_default(),
                data.unwrap_or_default()
            ))),
        };

        let status_ttl_secs: i64 = parse_or(&var, "STATUS_TTL_SECS", 86_400)?;
        if status_ttl_secs <= 0 {
            return Err(CoreError::Validation("STATUS_TTL_SECS must be positive".into()));
        }
        let status_capacity: usize = parse_or(&var, "STATUS_CAPACITY", 10_000)?;
        if status_capacity == 0 {
            return Err(CoreError::Validation("STATUS_CAPACITY must be positive".into()));
        }

        let callback_timeout_secs: u64 = parse_or(&var, "CALLBACK_TIMEOUT_SECS", 10)?;
        if callback_timeout_secs == 0 {
            return Err(CoreError::Validation("CALLBACK_TIMEOUT_SECS must be positive".into()));
        }

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "PORT", 8000)?,
            request_timeout_secs: parse_or(&var, "REQUEST_TIMEOUT_SECS", 30)?,
            environment,
            cloud_type,
            host_reporting,
            comfyui_url: var("COMFYUI_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into()),
            data_path,
            gcp_credentials: var("GCP_CREDENTIALS"),
            aws_credentials: var("AWS_CREDENTIALS"),
            gcs_key_file: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            s3: S3Settings {
                region: var("S3_REGION").unwrap_or_else(|| DEFAULT_REGION.into()),
                endpoint_url: var("S3_ENDPOINT_URL"),
                public_base_url: var("S3_PUBLIC_BASE_URL"),
            },
            status_ttl_secs,
            status_capacity,
            engine_timeout: optional_secs(&var, "ENGINE_TIMEOUT_SECS")?,
            upload_timeout: optional_secs(&var, "UPLOAD_TIMEOUT_SECS")?,
            callback_timeout: Duration::from_secs(callback_timeout_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, CoreError> {
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::Validation(format!("{name} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}

/// Unset or `0` means "no timeout".
fn optional_secs(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<Duration>, CoreError> {
    let secs: u64 = parse_or(var, name, 0)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, CoreError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.host_reporting, HostReporting::Disabled);
        assert_eq!(config.comfyui_url, "http://127.0.0.1:8188");
        assert_eq!(config.data_path, None);
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.status_ttl_secs, 86_400);
        assert_eq!(config.status_capacity, 10_000);
        assert_eq!(config.engine_timeout, None);
        assert_eq!(config.callback_timeout, Duration::from_secs(10));
    }

    #[test]
    fn data_path_concatenates_fs_and_data_path() {
        let config = load(&[("FS_PATH", "/runpod-volume"), ("DATA_PATH", "/output")]).unwrap();
        assert_eq!(config.data_path, Some(PathBuf::from("/runpod-volume/output")));
    }

    #[test]
    fn managed_runtime_in_development_logs() {
        let config = load(&[("CLOUD_TYPE", "RUNPOD"), ("ENV", "development")]).unwrap();
        assert_eq!(config.host_reporting, HostReporting::Log);
    }

    #[test]
    fn managed_runtime_in_production_pushes() {
        let config = load(&[
            ("CLOUD_TYPE", "RUNPOD"),
            ("HOST_PROGRESS_URL", "https://api.host/v2/$ID/progress"),
            ("HOST_API_KEY", "k"),
        ])
        .unwrap();
        assert_eq!(
            config.host_reporting,
            HostReporting::Push {
                url: "https://api.host/v2/$ID/progress".into(),
                api_key: Some("k".into()),
            }
        );
    }

    #[test]
    fn managed_runtime_without_url_is_rejected() {
        assert_matches!(load(&[("CLOUD_TYPE", "RUNPOD")]), Err(CoreError::Validation(_)));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert_matches!(load(&[("PORT", "eighty")]), Err(CoreError::Validation(msg)) if msg.contains("PORT"));
        assert_matches!(load(&[("STATUS_CAPACITY", "0")]), Err(CoreError::Validation(_)));
    }

    #[test]
    fn zero_timeout_means_none() {
        let config = load(&[("ENGINE_TIMEOUT_SECS", "0"), ("UPLOAD_TIMEOUT_SECS", "120")]).unwrap();
        assert_eq!(config.engine_timeout, None);
        assert_eq!(config.upload_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn callback_timeout_must_be_positive() {
        let config = load(&[("CALLBACK_TIMEOUT_SECS", "3")]).unwrap();
        assert_eq!(config.callback_timeout, Duration::from_secs(3));
        assert_matches!(load(&[("CALLBACK_TIMEOUT_SECS", "0")]), Err(CoreError::Validation(_)));
    }

    #[test]
    fn debug_redacts_credentials() {
        let config = load(&[("GCP_CREDENTIALS", "c2VjcmV0")]).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("c2VjcmV0"));
    }
}
