//! Google Cloud Storage backend ("GCP").
//!
//! Authentication uses an OAuth2 access token obtained either by signing a
//! service-account assertion (RS256 JWT, exchanged at the key's
//! `token_uri`) or, for ambient credentials, from the key file named by
//! `GOOGLE_APPLICATION_CREDENTIALS` or the instance metadata server.
//! Objects are written with the JSON API's simple media upload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::backend::ObjectStore;
use crate::credentials::Credentials;
use crate::error::StorageError;
use crate::naming::content_type;

/// Public GCS endpoint (API and object URLs).
pub const STORAGE_BASE_URL: &str = "https://storage.googleapis.com";

/// Token endpoint used when a key does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Instance metadata token endpoint.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime in seconds (the maximum Google accepts).
const ASSERTION_LIFETIME_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Settings and key material
// ---------------------------------------------------------------------------

/// Endpoints and ambient key location for the GCS backend.
#[derive(Debug, Clone)]
pub struct GcsSettings {
    /// Base URL of the JSON API.
    pub api_base: String,
    /// Base URL of public object links (`{public_base}/{bucket}/{key}`).
    pub public_base: String,
    /// Ambient service-account key file.
    pub key_file: Option<PathBuf>,
    pub metadata_token_url: String,
}

impl Default for GcsSettings {
    fn default() -> Self {
        Self {
            api_base: STORAGE_BASE_URL.to_string(),
            public_base: STORAGE_BASE_URL.to_string(),
            key_file: None,
            metadata_token_url: METADATA_TOKEN_URL.to_string(),
        }
    }
}

/// The fields of a service-account key file this backend needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_value(value: serde_json::Value) -> Result<Self, StorageError> {
        serde_json::from_value(value)
            .map_err(|e| StorageError::InvalidCredentials(format!("service-account key: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// ---------------------------------------------------------------------------
// Token acquisition
// ---------------------------------------------------------------------------

/// Sign the RS256 assertion exchanged for an access token.
pub fn sign_assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String, StorageError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: STORAGE_SCOPE,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| StorageError::InvalidCredentials(format!("private_key: {e}")))?;
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| StorageError::Auth(e.to_string()))
}

/// Obtain an access token for `credentials`.
pub async fn fetch_access_token(
    http: &reqwest::Client,
    settings: &GcsSettings,
    credentials: &Credentials,
) -> Result<String, StorageError> {
    match credentials {
        Credentials::Key(value) => {
            let key = ServiceAccountKey::from_value(value.clone())?;
            exchange_assertion(http, &key).await
        }
        Credentials::Ambient => match &settings.key_file {
            Some(path) => {
                let raw = tokio::fs::read(path).await?;
                let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
                    StorageError::InvalidCredentials(format!("{}: {e}", path.display()))
                })?;
                exchange_assertion(http, &ServiceAccountKey::from_value(value)?).await
            }
            None => metadata_token(http, &settings.metadata_token_url).await,
        },
    }
}

async fn exchange_assertion(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<String, StorageError> {
    let assertion = sign_assertion(key, chrono::Utc::now().timestamp())?;
    let response = http
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;
    parse_token(response).await
}

async fn metadata_token(http: &reqwest::Client, url: &str) -> Result<String, StorageError> {
    let response = http.get(url).header("Metadata-Flavor", "Google").send().await?;
    parse_token(response).await
}

async fn parse_token(response: reqwest::Response) -> Result<String, StorageError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::Auth(format!("token endpoint returned {status}: {body}")));
    }
    Ok(response.json::<TokenResponse>().await?.access_token)
}

// ---------------------------------------------------------------------------
// GcsStore
// ---------------------------------------------------------------------------

/// An authenticated handle on one GCS bucket.
pub struct GcsStore {
    http: reqwest::Client,
    settings: GcsSettings,
    bucket: String,
    token: String,
}

impl GcsStore {
    /// Authenticate and open `bucket`.
    pub async fn connect(
        http: reqwest::Client,
        settings: GcsSettings,
        bucket: &str,
        credentials: &Credentials,
    ) -> Result<Self, StorageError> {
        let token = fetch_access_token(&http, &settings, credentials).await?;
        Ok(Self::with_token(http, settings, bucket, token))
    }

    pub fn with_token(
        http: reqwest::Client,
        settings: GcsSettings,
        bucket: &str,
        token: String,
    ) -> Self {
        Self {
            http,
            settings,
            bucket: bucket.to_string(),
            token,
        }
    }

    /// Public URL of an object in this bucket.
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.settings.public_base.trim_end_matches('/'),
            self.bucket,
            key
        )
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn name(&self) -> &'static str {
        "gcs"
    }

    async fn put_file(&self, local: &Path, key: &str) -> Result<Option<String>, StorageError> {
        let bytes = tokio::fs::read(local).await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.settings.api_base.trim_end_matches('/'),
            self.bucket
        );

        let response = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type(key))
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend(format!("GCS returned {status}: {body}")));
        }
        Ok(Some(self.public_url(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY_PEM: &str = include_str!("../tests/fixtures/test_service_account.pem");

    fn settings(server: &MockServer) -> GcsSettings {
        GcsSettings {
            api_base: server.uri(),
            public_base: STORAGE_BASE_URL.to_string(),
            key_file: None,
            metadata_token_url: format!("{}/metadata/token", server.uri()),
        }
    }

    fn service_account(server: &MockServer) -> serde_json::Value {
        json!({
            "type": "service_account",
            "client_email": "uploader@project.iam.gserviceaccount.com",
            "private_key": TEST_KEY_PEM,
            "token_uri": format!("{}/token", server.uri()),
        })
    }

    #[test]
    fn signs_rs256_assertion() {
        let key = ServiceAccountKey {
            client_email: "svc@example.com".into(),
            private_key: TEST_KEY_PEM.into(),
            token_uri: DEFAULT_TOKEN_URI.into(),
        };
        let jwt = sign_assertion(&key, 1_700_000_000).unwrap();
        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
    }

    #[test]
    fn malformed_private_key_is_invalid_credentials() {
        let key = ServiceAccountKey {
            client_email: "svc@example.com".into(),
            private_key: "not a pem".into(),
            token_uri: DEFAULT_TOKEN_URI.into(),
        };
        assert_matches!(
            sign_assertion(&key, 0),
            Err(StorageError::InvalidCredentials(_))
        );
    }

    #[test]
    fn key_without_client_email_is_rejected() {
        let result = ServiceAccountKey::from_value(json!({"private_key": "x"}));
        assert_matches!(result, Err(StorageError::InvalidCredentials(_)));
    }

    #[tokio::test]
    async fn explicit_key_is_exchanged_then_object_uploaded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok-1", "expires_in": 3599})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/media/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", "renders/a.png"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "renders/a.png"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.png");
        std::fs::write(&local, b"png-bytes").unwrap();

        let store = GcsStore::connect(
            reqwest::Client::new(),
            settings(&server),
            "media",
            &Credentials::Key(service_account(&server)),
        )
        .await
        .unwrap();
        let url = store.put_file(&local, "renders/a.png").await.unwrap();

        assert_eq!(
            url.as_deref(),
            Some("https://storage.googleapis.com/media/renders/a.png")
        );
    }

    #[tokio::test]
    async fn ambient_without_key_file_uses_metadata_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/token"))
            .and(header("metadata-flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "meta"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = fetch_access_token(&reqwest::Client::new(), &settings(&server), &Credentials::Ambient)
            .await
            .unwrap();
        assert_eq!(token, "meta");
    }

    #[tokio::test]
    async fn rejected_upload_is_a_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.jpg");
        std::fs::write(&local, b"jpg").unwrap();

        let store = GcsStore::with_token(reqwest::Client::new(), settings(&server), "media", "t".into());
        let result = store.put_file(&local, "a.jpg").await;
        assert_matches!(result, Err(StorageError::Backend(msg)) if msg.contains("403"));
    }
}
