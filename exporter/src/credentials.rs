//! Service-account credentials and OAuth2 access tokens for the compute API.
//!
//! Tokens are obtained with the JWT-bearer grant: an RS256 assertion signed
//! with the key's private key is exchanged at the key's token URI.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const COMPUTE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/compute.readonly";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Failed to read credentials file {path}: {message}")]
    IoError { path: String, message: String },

    #[error("Invalid service account key: {message}")]
    InvalidKey { message: String },

    #[error("Failed to sign token assertion: {message}")]
    SigningFailed { message: String },

    #[error("Token request failed: {message}")]
    TokenRequestFailed { message: String },

    #[error("Token endpoint returned status {status}: {body}")]
    TokenRejected { status: u16, body: String },
}

/// The parts of a service-account key file the exporter needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CredentialsError::IoError {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CredentialsError> {
        let key: ServiceAccountKey =
            serde_json::from_str(content).map_err(|e| CredentialsError::InvalidKey {
                message: e.to_string(),
            })?;

        if let Some(key_type) = &key.key_type {
            if key_type != "service_account" {
                return Err(CredentialsError::InvalidKey {
                    message: format!("unsupported credentials type '{}'", key_type),
                });
            }
        }

        Ok(key)
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
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Issues access tokens for one service account, reusing each token until
/// shortly before it expires.
pub struct TokenProvider {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Fails if the private key is not a valid RSA PEM.
    pub fn new(key: ServiceAccountKey) -> Result<Self, CredentialsError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            CredentialsError::InvalidKey {
                message: format!("private key: {}", e),
            }
        })?;

        Ok(Self {
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    /// Build the signed JWT-bearer assertion for a token request issued at `now`.
    pub fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, CredentialsError> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: COMPUTE_READONLY_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.signing_key).map_err(|e| CredentialsError::SigningFailed {
            message: e.to_string(),
        })
    }

    /// Return a valid access token, exchanging a new assertion when needed.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String, CredentialsError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        debug!(
            client_email = %self.key.client_email,
            token_uri = %self.key.token_uri,
            "Requesting access token"
        );

        let assertion = self.sign_assertion(now)?;
        let response = http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| CredentialsError::TokenRequestFailed {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            return Err(CredentialsError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| CredentialsError::TokenRequestFailed {
                    message: format!("invalid token response: {}", e),
                })?;

        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + Duration::seconds(lifetime),
        });

        Ok(token.access_token)
    }
}
