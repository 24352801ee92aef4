//! Collector registry and scrape orchestration

use crate::client::{ComputeQuotaClient, QuotaClient, UnusableCredentialsClient};
use crate::collector::QuotaCollector;
use crate::credentials::{CredentialsError, ServiceAccountKey, TokenProvider};
use crate::metrics::ScrapeGauges;
use config_loader::{ConfigLoad, ProjectConfig};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Collector for project [{project}] is already registered")]
    DuplicateCollector { project: String },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Failed to build HTTP client: {message}")]
    HttpClient { message: String },
}

/// All registered collectors plus the config error count fixed at load time.
pub struct Exporter {
    collectors: Vec<QuotaCollector>,
    registered: HashSet<String>,
    config_errors: u64,
}

impl Exporter {
    /// Descriptors are validated here so that a bad metric set fails at startup.
    pub fn new(config_errors: u64) -> Result<Self, ExporterError> {
        ScrapeGauges::new()?;

        Ok(Self {
            collectors: Vec::new(),
            registered: HashSet::new(),
            config_errors,
        })
    }

    /// Build one collector per accepted project.
    ///
    /// A credentials file that is not a usable service-account key still gets
    /// a collector; its queries all fail and the project reports as down.
    pub fn from_config(load: &ConfigLoad, endpoint: &str) -> Result<Self, ExporterError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ExporterError::HttpClient {
                message: e.to_string(),
            })?;

        let mut exporter = Self::new(load.error_count())?;

        for project in &load.projects {
            let client: Arc<dyn QuotaClient> = match build_client(project, endpoint, http.clone())
            {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    error!(
                        project = %project.project,
                        credentials = %project.credentials,
                        error = %e,
                        "Unusable credentials"
                    );
                    Arc::new(UnusableCredentialsClient::new(&e))
                }
            };

            exporter.register(QuotaCollector::new(
                project.project.clone(),
                project.regions.clone(),
                client,
            ))?;
        }

        Ok(exporter)
    }

    pub fn register(&mut self, collector: QuotaCollector) -> Result<(), ExporterError> {
        if !self.registered.insert(collector.project().to_string()) {
            return Err(ExporterError::DuplicateCollector {
                project: collector.project().to_string(),
            });
        }

        info!(
            project = %collector.project(),
            regions = ?collector.regions(),
            "Registered quota collector"
        );
        self.collectors.push(collector);
        Ok(())
    }

    pub fn collectors(&self) -> &[QuotaCollector] {
        &self.collectors
    }

    pub fn config_errors(&self) -> u64 {
        self.config_errors
    }

    /// Query every collector in registration order and render the result.
    pub async fn scrape(&self) -> Result<String, ExporterError> {
        let gauges = ScrapeGauges::new()?;
        gauges.set_config_errors(self.config_errors);

        for collector in &self.collectors {
            let report = collector.collect().await;
            gauges.record(&report);
        }

        debug!(collectors = self.collectors.len(), "Scrape finished");
        Ok(gauges.encode()?)
    }
}

fn build_client(
    project: &ProjectConfig,
    endpoint: &str,
    http: reqwest::Client,
) -> Result<ComputeQuotaClient, CredentialsError> {
    let key = ServiceAccountKey::from_file(&project.credentials)?;
    let tokens = TokenProvider::new(key)?;
    Ok(ComputeQuotaClient::new(endpoint, http, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ProjectQuota, QuotaError, RegionQuota};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl QuotaClient for Unreachable {
        async fn project_quota(&self, _project: &str) -> Result<ProjectQuota, QuotaError> {
            Err(QuotaError::RequestFailed {
                message: "connection refused".to_string(),
            })
        }

        async fn region_quota(
            &self,
            _project: &str,
            _region: &str,
        ) -> Result<RegionQuota, QuotaError> {
            Err(QuotaError::RequestFailed {
                message: "connection refused".to_string(),
            })
        }

        async fn list_region_quotas(&self, _project: &str) -> Result<Vec<RegionQuota>, QuotaError> {
            Err(QuotaError::RequestFailed {
                message: "connection refused".to_string(),
            })
        }
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let mut exporter = Exporter::new(1).unwrap();
        exporter
            .register(QuotaCollector::new("alpha", vec![], Arc::new(Unreachable)))
            .unwrap();

        let result = exporter.register(QuotaCollector::new("alpha", vec![], Arc::new(Unreachable)));

        assert!(matches!(
            result,
            Err(ExporterError::DuplicateCollector { .. })
        ));
        assert_eq!(exporter.collectors().len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_with_failing_upstream() {
        let mut exporter = Exporter::new(2).unwrap();
        exporter
            .register(QuotaCollector::new("alpha", vec![], Arc::new(Unreachable)))
            .unwrap();
        exporter
            .register(QuotaCollector::new(
                "beta",
                vec!["us-east1".to_string()],
                Arc::new(Unreachable),
            ))
            .unwrap();

        let text = exporter.scrape().await.unwrap();

        assert!(text.contains("gcp_quota_config_err 2"));
        assert!(text.contains(r#"gcp_quota_project_up{project="alpha"} 0"#));
        assert!(text.contains(r#"gcp_quota_project_up{project="beta"} 0"#));
        assert!(text.contains(r#"gcp_quota_regions_up{project="beta",region="us-east1"} 0"#));
        assert!(!text.contains(r#"gcp_quota_regions_up{project="alpha""#));
    }

    #[test]
    fn test_empty_exporter_reports_config_errors_only() {
        let exporter = Exporter::new(1).unwrap();
        assert!(exporter.collectors().is_empty());
        assert_eq!(exporter.config_errors(), 1);
    }
}
