//! Google service-account authentication for the Sheets API.
//!
//! Signs a short-lived RS256 JWT assertion with the service account's
//! private key and exchanges it for an access token, caching the token
//! until shortly before it expires.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scope required for reading and appending sheet values.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Error types for Google authentication.
#[derive(Debug, thiserror::Error)]
pub enum GoogleAuthError {
    #[error("failed to read service account key {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid service account key: {0}")]
    KeyParse(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("http error: {0}")]
    HttpError(String),
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
}

struct Credentials {
    client_email: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The private key never appears in debug output
        f.debug_struct("Credentials")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct GoogleAuthInner {
    credentials: Option<Credentials>,
    token_uri: String,
    /// Current access token and its expiry
    cached: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Service-account credential and token management.
#[derive(Debug, Clone)]
pub struct GoogleAuth {
    inner: Arc<GoogleAuthInner>,
    http: reqwest::Client,
}

impl GoogleAuth {
    /// Load credentials from a service account key file.
    pub fn from_key_file(path: &Path) -> Result<Self, GoogleAuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GoogleAuthError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|e| GoogleAuthError::KeyParse(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| GoogleAuthError::KeyParse(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(GoogleAuthInner {
                credentials: Some(Credentials {
                    client_email: key.client_email,
                    encoding_key,
                }),
                token_uri: key.token_uri,
                cached: RwLock::new(None),
            }),
            http: reqwest::Client::new(),
        })
    }

    /// Use a pre-generated access token and never hit the token endpoint.
    /// Useful for sandbox environments without network access.
    pub fn with_static_token(access_token: impl Into<String>) -> Self {
        // Pre-generated tokens are assumed valid for 1 hour
        let cached = CachedToken {
            access_token: access_token.into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        Self {
            inner: Arc::new(GoogleAuthInner {
                credentials: None,
                token_uri: default_token_uri(),
                cached: RwLock::new(Some(cached)),
            }),
            http: reqwest::Client::new(),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String, GoogleAuthError> {
        // Check the cached token first
        {
            let cached = self.inner.cached.read().unwrap();
            if let Some(token) = cached.as_ref() {
                // Add 60 second buffer before expiration
                if token.expires_at > Instant::now() + Duration::from_secs(60) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        self.refresh_access_token().await
    }

    async fn refresh_access_token(&self) -> Result<String, GoogleAuthError> {
        let credentials = self.inner.credentials.as_ref().ok_or_else(|| {
            GoogleAuthError::MissingCredentials(
                "no service account key loaded and the static token expired".to_string(),
            )
        })?;

        let assertion = sign_assertion(credentials, &self.inner.token_uri)?;
        debug!("exchanging service account assertion for access token");

        let response = self
            .http
            .post(&self.inner.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| GoogleAuthError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GoogleAuthError::TokenExchangeFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let token: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| GoogleAuthError::TokenExchangeFailed(e.to_string()))?;

        let expires_at = Instant::now() + Duration::from_secs(token.expires_in.max(0) as u64);
        {
            let mut cached = self.inner.cached.write().unwrap();
            *cached = Some(CachedToken {
                access_token: token.access_token.clone(),
                expires_at,
            });
        }

        debug!("service account token refreshed");
        Ok(token.access_token)
    }
}

fn sign_assertion(credentials: &Credentials, aud: &str) -> Result<String, GoogleAuthError> {
    let now = chrono::Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &credentials.client_email,
        scope: SHEETS_SCOPE,
        aud,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &credentials.encoding_key,
    )
    .map_err(|e| GoogleAuthError::KeyParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_without_network() {
        let auth = GoogleAuth::with_static_token("sandbox-token");
        let token = auth.get_access_token().await.unwrap();
        assert_eq!(token, "sandbox-token");
    }

    #[test]
    fn auth_handle_is_debug_printable() {
        let auth = GoogleAuth::with_static_token("sandbox-token");
        let printed = format!("{:?}", auth);
        assert!(printed.contains("GoogleAuth"));
    }

    #[test]
    fn key_file_missing_is_reported_with_path() {
        let err = GoogleAuth::from_key_file(Path::new("/nonexistent/key.json")).unwrap_err();
        match err {
            GoogleAuthError::KeyFile { path, .. } => {
                assert!(path.contains("key.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_private_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"client_email":"svc@example.iam.gserviceaccount.com","private_key":"not-a-pem"}"#,
        )
        .unwrap();

        assert!(matches!(
            GoogleAuth::from_key_file(&path).unwrap_err(),
            GoogleAuthError::KeyParse(_)
        ));
    }
}
