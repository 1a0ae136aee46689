//! Sequential artifact upload.
//!
//! With a single artifact the target key is used verbatim (after the
//! format policy may have turned a PNG into a JPEG). With several, the
//! key becomes a folder prefix and each artifact is stored under its
//! normalized name. Each local file is deleted once its upload
//! succeeded; the first failure aborts the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_core::job::Artifact;
use relay_core::upload::UploadTarget;

use crate::backend::{ObjectStore, StoreProvider};
use crate::credentials::CredentialResolver;
use crate::error::{TranscodeError, UploadError};
use crate::naming::{multi_file_key, needs_transcode, with_extension};
use crate::transcode::transcode_to_jpeg;

/// Uploads a job's artifacts to the target backend.
pub struct UploadPipeline {
    resolver: CredentialResolver,
    provider: Arc<dyn StoreProvider>,
    timeout: Option<Duration>,
}

impl UploadPipeline {
    pub fn new(resolver: CredentialResolver, provider: Arc<dyn StoreProvider>) -> Self {
        Self {
            resolver,
            provider,
            timeout: None,
        }
    }

    /// Bound each individual upload.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upload `artifacts` to `target`, returning them with their URLs set.
    pub async fn upload(
        &self,
        artifacts: Vec<Artifact>,
        target: &UploadTarget,
    ) -> Result<Vec<Artifact>, UploadError> {
        if artifacts.is_empty() {
            tracing::info!(bucket = %target.bucket, "No artifacts to upload");
            return Ok(artifacts);
        }

        let (source, credentials) = self.resolver.resolve(target)?;
        tracing::debug!(
            cloud_type = target.cloud_type.name(),
            ?source,
            "Resolved storage credentials"
        );
        let store = self
            .provider
            .open(target.cloud_type, &target.bucket, credentials)
            .await?;

        let single = artifacts.len() == 1;
        let mut uploaded = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let (artifact, key) = if single {
                (apply_format_policy(artifact, &target.key).await?, target.key.clone())
            } else {
                let key = multi_file_key(&target.key, &artifact.name);
                (artifact, key)
            };

            let url = self.put(store.as_ref(), Path::new(&artifact.path), &key).await?;
            tracing::info!(
                backend = store.name(),
                bucket = %target.bucket,
                key = %key,
                "Uploaded artifact"
            );

            if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
                tracing::warn!(path = %artifact.path, error = %e, "Failed to delete uploaded file");
            }
            uploaded.push(artifact.uploaded(url));
        }

        Ok(uploaded)
    }

    async fn put(
        &self,
        store: &dyn ObjectStore,
        local: &Path,
        key: &str,
    ) -> Result<Option<String>, UploadError> {
        let upload = store.put_file(local, key);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, upload)
                .await
                .map_err(|_| UploadError::TimedOut {
                    key: key.to_string(),
                })?
                .map_err(UploadError::from),
            None => upload.await.map_err(UploadError::from),
        }
    }
}

/// Transcode a lossless artifact when the destination key wants a lossy
/// format; the artifact is renamed to match.
async fn apply_format_policy(artifact: Artifact, key: &str) -> Result<Artifact, UploadError> {
    if !needs_transcode(&artifact.name, key) {
        return Ok(artifact);
    }

    let src = PathBuf::from(&artifact.path);
    let dest = tokio::task::spawn_blocking(move || transcode_to_jpeg(&src))
        .await
        .map_err(|e| TranscodeError::Task(e.to_string()))??;

    Ok(Artifact {
        name: with_extension(&artifact.name, "jpg"),
        path: dest.to_string_lossy().into_owned(),
        url: artifact.url,
    })
}
