//! Object-store abstraction and the production provider.

use std::path::Path;

use async_trait::async_trait;
use relay_core::upload::CloudType;

use crate::credentials::Credentials;
use crate::error::StorageError;
use crate::gcs::{GcsSettings, GcsStore};
use crate::s3::{S3Settings, S3Store};

/// A bucket on some object-storage backend, ready to receive files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Upload the file at `local` under `key`.
    ///
    /// Returns the object's URL, or `None` when the backend cannot tell
    /// where the object is publicly reachable.
    async fn put_file(&self, local: &Path, key: &str) -> Result<Option<String>, StorageError>;
}

/// Opens [`ObjectStore`]s for a backend kind, bucket and credentials.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn open(
        &self,
        cloud_type: CloudType,
        bucket: &str,
        credentials: Credentials,
    ) -> Result<Box<dyn ObjectStore>, StorageError>;
}

/// Provider for the real backends: GCS for `GCP`, S3-compatible for `AWS`.
#[derive(Debug, Clone)]
pub struct CloudStoreProvider {
    http: reqwest::Client,
    gcs: GcsSettings,
    s3: S3Settings,
}

impl CloudStoreProvider {
    pub fn new(http: reqwest::Client, gcs: GcsSettings, s3: S3Settings) -> Self {
        Self { http, gcs, s3 }
    }
}

#[async_trait]
impl StoreProvider for CloudStoreProvider {
    async fn open(
        &self,
        cloud_type: CloudType,
        bucket: &str,
        credentials: Credentials,
    ) -> Result<Box<dyn ObjectStore>, StorageError> {
        match cloud_type {
            CloudType::Gcp => {
                let store =
                    GcsStore::connect(self.http.clone(), self.gcs.clone(), bucket, &credentials)
                        .await?;
                Ok(Box::new(store))
            }
            CloudType::Aws => {
                let store = S3Store::connect(self.s3.clone(), bucket, &credentials).await?;
                Ok(Box::new(store))
            }
        }
    }
}
