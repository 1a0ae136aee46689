//! S3-compatible backend ("AWS").
//!
//! Works against AWS itself or any S3-compatible service reachable at a
//! custom endpoint (path-style addressing is forced for those).

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use serde::Deserialize;

use crate::backend::ObjectStore;
use crate::credentials::Credentials;
use crate::error::StorageError;
use crate::naming::content_type;

/// Default region when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Provider name attached to explicitly supplied credentials.
const EXPLICIT_PROVIDER: &str = "relay-explicit";

/// Region and addressing settings for the S3 backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint of an S3-compatible service.
    pub endpoint_url: Option<String>,
    /// Public base URL objects are served from, if known.
    pub public_base_url: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            public_base_url: None,
        }
    }
}

/// Access-key credential document.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessKey {
    #[serde(alias = "aws_access_key_id", alias = "accessKeyId")]
    pub access_key_id: String,
    #[serde(alias = "aws_secret_access_key", alias = "secretAccessKey")]
    pub secret_access_key: String,
    #[serde(default, alias = "aws_session_token", alias = "sessionToken")]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// URL an uploaded object is reachable at.
///
/// An explicit public base wins. With a custom endpoint and no public
/// base the location is unknown and `None` is returned rather than a
/// guess. Otherwise the regional virtual-hosted-style AWS URL is used.
pub fn object_url(settings: &S3Settings, bucket: &str, key: &str) -> Option<String> {
    if let Some(base) = &settings.public_base_url {
        return Some(format!("{}/{key}", base.trim_end_matches('/')));
    }
    if settings.endpoint_url.is_some() {
        return None;
    }
    Some(format!(
        "https://{bucket}.s3.{}.amazonaws.com/{key}",
        settings.region
    ))
}

/// A handle on one bucket of an S3-compatible service.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    settings: S3Settings,
    bucket: String,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("settings", &self.settings)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    /// Build a client for `bucket` with the given credentials.
    ///
    /// Explicit access keys are used as-is (their `region`, if present,
    /// overrides the configured one); ambient credentials go through the
    /// SDK's default provider chain.
    pub async fn connect(
        mut settings: S3Settings,
        bucket: &str,
        credentials: &Credentials,
    ) -> Result<Self, StorageError> {
        let access_key = match credentials {
            Credentials::Key(value) => Some(
                serde_json::from_value::<AccessKey>(value.clone())
                    .map_err(|e| StorageError::InvalidCredentials(format!("access key: {e}")))?,
            ),
            Credentials::Ambient => None,
        };
        if let Some(region) = access_key.as_ref().and_then(|k| k.region.clone()) {
            settings.region = region;
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));
        if let Some(key) = access_key {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                key.access_key_id,
                key.secret_access_key,
                key.session_token,
                None,
                EXPLICIT_PROVIDER,
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            settings,
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put_file(&self, local: &Path, key: &str) -> Result<Option<String>, StorageError> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::Backend(format!("{}: {e}", local.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(key))
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;

        Ok(object_url(&self.settings, &self.bucket, key))
    }
}
