//! Quota client trait and the compute API implementation
//!
//! Collectors talk to the upstream API only through [`QuotaClient`], so they can
//! be driven by the HTTP client in production and by fakes in tests.

use crate::credentials::{CredentialsError, TokenProvider};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] CredentialsError),

    #[error("HTTP request failed: {message}")]
    RequestFailed { message: String },

    #[error("Compute API returned error status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid compute API response: {message}")]
    InvalidResponse { message: String },
}

/// One quota entry: a metric with its limit and current usage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Quota {
    pub metric: String,
    #[serde(default)]
    pub limit: f64,
    #[serde(default)]
    pub usage: f64,
}

impl Quota {
    pub fn new(metric: impl Into<String>, limit: f64, usage: f64) -> Self {
        Self {
            metric: metric.into(),
            limit,
            usage,
        }
    }
}

/// Project-level quota snapshot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectQuota {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quotas: Vec<Quota>,
}

/// Region-level quota snapshot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegionQuota {
    pub name: String,
    #[serde(default)]
    pub quotas: Vec<Quota>,
}

impl RegionQuota {
    pub fn new(name: impl Into<String>, quotas: Vec<Quota>) -> Self {
        Self {
            name: name.into(),
            quotas,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegionList {
    #[serde(default)]
    items: Vec<RegionQuota>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

/// Read-only access to project and region quotas.
#[async_trait]
pub trait QuotaClient: Send + Sync {
    async fn project_quota(&self, project: &str) -> Result<ProjectQuota, QuotaError>;

    async fn region_quota(&self, project: &str, region: &str) -> Result<RegionQuota, QuotaError>;

    /// Every region of the project. Fails as a whole if any page fails.
    async fn list_region_quotas(&self, project: &str) -> Result<Vec<RegionQuota>, QuotaError>;
}

/// Compute API client bound to one service account.
pub struct ComputeQuotaClient {
    endpoint: String,
    http: reqwest::Client,
    tokens: TokenProvider,
}

impl ComputeQuotaClient {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client, tokens: TokenProvider) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            tokens,
        }
    }

    /// Append `segments` to the endpoint path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, QuotaError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| QuotaError::RequestFailed {
            message: format!("invalid endpoint {}: {}", self.endpoint, e),
        })?;

        url.path_segments_mut()
            .map_err(|_| QuotaError::RequestFailed {
                message: format!("endpoint {} cannot take a path", self.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, QuotaError> {
        let token = self.tokens.access_token(&self.http).await?;
        let url = self.url(segments)?;

        debug!(url = %url, "Querying compute API");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| QuotaError::RequestFailed {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            return Err(QuotaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| QuotaError::InvalidResponse {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl QuotaClient for ComputeQuotaClient {
    async fn project_quota(&self, project: &str) -> Result<ProjectQuota, QuotaError> {
        self.get_json(&["projects", project], &[]).await
    }

    async fn region_quota(&self, project: &str, region: &str) -> Result<RegionQuota, QuotaError> {
        self.get_json(&["projects", project, "regions", region], &[])
            .await
    }

    async fn list_region_quotas(&self, project: &str) -> Result<Vec<RegionQuota>, QuotaError> {
        let path = ["projects", project, "regions"];
        let mut regions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: RegionList = match &page_token {
                Some(token) => self.get_json(&path, &[("pageToken", token.as_str())]).await?,
                None => self.get_json(&path, &[]).await?,
            };

            regions.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(regions)
    }
}

/// Stands in for a project whose credentials file could not be turned into a
/// token source. Every query fails, so the project is reported as down.
pub struct UnusableCredentialsClient {
    message: String,
}

impl UnusableCredentialsClient {
    pub fn new(cause: &CredentialsError) -> Self {
        Self {
            message: cause.to_string(),
        }
    }

    fn failure(&self) -> QuotaError {
        QuotaError::Auth(CredentialsError::InvalidKey {
            message: self.message.clone(),
        })
    }
}

#[async_trait]
impl QuotaClient for UnusableCredentialsClient {
    async fn project_quota(&self, _project: &str) -> Result<ProjectQuota, QuotaError> {
        Err(self.failure())
    }

    async fn region_quota(&self, _project: &str, _region: &str) -> Result<RegionQuota, QuotaError> {
        Err(self.failure())
    }

    async fn list_region_quotas(&self, _project: &str) -> Result<Vec<RegionQuota>, QuotaError> {
        Err(self.failure())
    }
}
