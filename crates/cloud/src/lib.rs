//! Artifact upload to cloud object storage.
//!
//! The [`UploadPipeline`] resolves credentials through an ordered
//! [`CredentialResolver`], opens an [`ObjectStore`] for the requested
//! backend ("GCP": Google Cloud Storage, "AWS": any S3-compatible
//! service), derives destination keys, transcodes lossless images when
//! the destination asks for a lossy format, uploads sequentially and
//! deletes each local file once it is stored.

pub mod backend;
pub mod credentials;
pub mod error;
pub mod gcs;
pub mod naming;
pub mod pipeline;
pub mod s3;
pub mod transcode;

pub use backend::{CloudStoreProvider, ObjectStore, StoreProvider};
pub use credentials::{CredentialResolver, CredentialSource, Credentials};
pub use error::{CredentialError, StorageError, TranscodeError, UploadError};
pub use pipeline::UploadPipeline;
