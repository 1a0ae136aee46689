use relay_core::upload::CloudType;

/// Credential resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A configured base64 credential value could not be decoded.
    #[error("{var} is not valid base64-encoded JSON: {reason}")]
    Decode { var: &'static str, reason: String },

    /// No strategy in the chain produced credentials for the backend.
    #[error("No credentials available for {}", .0.name())]
    Unavailable(CloudType),
}

/// Object-store failures (authentication, transport, backend rejections).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Lossless-to-lossy conversion failures.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transcode task failed: {0}")]
    Task(String),
}

/// Any failure that aborts a job's upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("Upload of {key} timed out")]
    TimedOut { key: String },
}
