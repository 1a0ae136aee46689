//! Ordered credential resolution.
//!
//! A [`CredentialResolver`] holds a list of strategies and returns the
//! first one that yields credentials for the requested backend. The
//! default chain is: credentials sent with the request, then the
//! base64-encoded value from configuration, then the provider's ambient
//! chain (instance metadata, key file, environment).

use std::collections::HashMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use relay_core::upload::{CloudType, UploadTarget};

use crate::error::CredentialError;

/// Credentials handed to an object-store backend.
#[derive(Clone, PartialEq)]
pub enum Credentials {
    /// A key document (GCS service-account JSON or an S3 access-key object).
    Key(serde_json::Value),
    /// Let the backend use its provider's default discovery.
    Ambient,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(_) => f.write_str("Key(<redacted>)"),
            Self::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Which strategy produced the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    EncodedEnv,
    Ambient,
}

/// One step of the resolution chain.
#[derive(Clone)]
pub enum CredentialStrategy {
    /// Credentials supplied with the upload request.
    Explicit,
    /// Pre-decoded credentials from configuration, per backend.
    EncodedEnv(HashMap<CloudType, serde_json::Value>),
    /// The provider's ambient chain; always applies.
    Ambient,
}

/// Resolves credentials by trying strategies in order.
#[derive(Clone)]
pub struct CredentialResolver {
    strategies: Vec<CredentialStrategy>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .strategies
            .iter()
            .map(|s| match s {
                CredentialStrategy::Explicit => "Explicit",
                CredentialStrategy::EncodedEnv(_) => "EncodedEnv(<redacted>)",
                CredentialStrategy::Ambient => "Ambient",
            })
            .collect();
        f.debug_struct("CredentialResolver").field("strategies", &names).finish()
    }
}

impl CredentialResolver {
    pub fn new(strategies: Vec<CredentialStrategy>) -> Self {
        Self { strategies }
    }

    /// The standard chain: explicit, then encoded configuration, then ambient.
    pub fn standard(encoded: HashMap<CloudType, serde_json::Value>) -> Self {
        Self::new(vec![
            CredentialStrategy::Explicit,
            CredentialStrategy::EncodedEnv(encoded),
            CredentialStrategy::Ambient,
        ])
    }

    /// Build the standard chain from the raw `GCP_CREDENTIALS` /
    /// `AWS_CREDENTIALS` values.
    ///
    /// Decoding happens here, once, so a malformed value is a startup
    /// error instead of a per-job surprise.
    pub fn from_encoded(gcp: Option<&str>, aws: Option<&str>) -> Result<Self, CredentialError> {
        let mut encoded = HashMap::new();
        if let Some(raw) = gcp {
            encoded.insert(CloudType::Gcp, decode_credentials("GCP_CREDENTIALS", raw)?);
        }
        if let Some(raw) = aws {
            encoded.insert(CloudType::Aws, decode_credentials("AWS_CREDENTIALS", raw)?);
        }
        Ok(Self::standard(encoded))
    }

    /// Resolve credentials for `target`.
    pub fn resolve(
        &self,
        target: &UploadTarget,
    ) -> Result<(CredentialSource, Credentials), CredentialError> {
        for strategy in &self.strategies {
            match strategy {
                CredentialStrategy::Explicit => {
                    if let Some(creds) = &target.credentials {
                        return Ok((CredentialSource::Explicit, Credentials::Key(creds.clone())));
                    }
                }
                CredentialStrategy::EncodedEnv(by_cloud) => {
                    if let Some(creds) = by_cloud.get(&target.cloud_type) {
                        return Ok((CredentialSource::EncodedEnv, Credentials::Key(creds.clone())));
                    }
                }
                CredentialStrategy::Ambient => {
                    return Ok((CredentialSource::Ambient, Credentials::Ambient));
                }
            }
        }
        Err(CredentialError::Unavailable(target.cloud_type))
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::standard(HashMap::new())
    }
}

/// Decode a base64 value holding a JSON object.
pub fn decode_credentials(var: &'static str, raw: &str) -> Result<serde_json::Value, CredentialError> {
    let bytes = BASE64.decode(raw.trim()).map_err(|e| CredentialError::Decode {
        var,
        reason: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| CredentialError::Decode {
            var,
            reason: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(CredentialError::Decode {
            var,
            reason: "expected a JSON object".into(),
        });
    }
    Ok(value)
}
