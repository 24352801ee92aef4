//! Per-project quota collector

use crate::client::{ProjectQuota, QuotaClient, RegionQuota};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Result of one query cycle. `None` means the data source was unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub project: Option<ProjectQuota>,
    pub regions: Option<Vec<RegionQuota>>,
}

/// A limit/usage pair for one quota metric. `region` is empty for project quotas.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSample {
    pub project: String,
    pub region: String,
    pub metric: String,
    pub limit: f64,
    pub usage: f64,
}

/// Everything one collector reports for a single scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectReport {
    pub project: String,
    pub samples: Vec<QuotaSample>,
    pub project_up: bool,
    /// One entry per allowlisted region, in configured order.
    pub regions_up: Vec<(String, bool)>,
}

impl ProjectReport {
    pub fn from_query(project: &str, configured_regions: &[String], result: &QueryResult) -> Self {
        let mut samples = Vec::new();

        if let Some(snapshot) = &result.project {
            samples.extend(snapshot.quotas.iter().map(|quota| QuotaSample {
                project: project.to_string(),
                region: String::new(),
                metric: quota.metric.clone(),
                limit: quota.limit,
                usage: quota.usage,
            }));
        }

        let mut scraped_regions: HashSet<&str> = HashSet::new();
        for region in result.regions.iter().flatten() {
            samples.extend(region.quotas.iter().map(|quota| QuotaSample {
                project: project.to_string(),
                region: region.name.clone(),
                metric: quota.metric.clone(),
                limit: quota.limit,
                usage: quota.usage,
            }));
            scraped_regions.insert(region.name.as_str());
        }

        let regions_up = configured_regions
            .iter()
            .map(|region| (region.clone(), scraped_regions.contains(region.as_str())))
            .collect();

        Self {
            project: project.to_string(),
            samples,
            project_up: result.project.is_some(),
            regions_up,
        }
    }
}

/// Queries one project's quotas on demand.
///
/// Scrapes of the same collector run one at a time.
pub struct QuotaCollector {
    project: String,
    regions: Vec<String>,
    client: Arc<dyn QuotaClient>,
    scrape_lock: Mutex<()>,
}

impl QuotaCollector {
    pub fn new(
        project: impl Into<String>,
        regions: Vec<String>,
        client: Arc<dyn QuotaClient>,
    ) -> Self {
        Self {
            project: project.into(),
            regions,
            client,
            scrape_lock: Mutex::new(()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Configured allowlist; empty means every region.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Run a query cycle and build the report, serialized per collector.
    pub async fn collect(&self) -> ProjectReport {
        let _guard = self.scrape_lock.lock().await;

        let result = self.query().await;
        ProjectReport::from_query(&self.project, &self.regions, &result)
    }

    /// Fetch project and region quotas. Failures are logged and leave the
    /// corresponding part absent.
    pub async fn query(&self) -> QueryResult {
        let project = match self.client.project_quota(&self.project).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!(
                    project = %self.project,
                    error = %e,
                    "Failure when querying project quotas"
                );
                None
            }
        };

        let regions = if self.regions.is_empty() {
            match self.client.list_region_quotas(&self.project).await {
                Ok(regions) => Some(regions),
                Err(e) => {
                    error!(
                        project = %self.project,
                        error = %e,
                        "Failure when querying region quotas"
                    );
                    None
                }
            }
        } else {
            let mut regions = Vec::with_capacity(self.regions.len());
            for name in &self.regions {
                match self.client.region_quota(&self.project, name).await {
                    Ok(region) => regions.push(region),
                    Err(e) => {
                        error!(
                            project = %self.project,
                            region = %name,
                            error = %e,
                            "Failure when querying region quotas"
                        );
                    }
                }
            }
            Some(regions)
        };

        debug!(
            project = %self.project,
            project_ok = project.is_some(),
            regions = regions.as_ref().map(Vec::len).unwrap_or(0),
            "Quota query cycle finished"
        );

        QueryResult { project, regions }
    }
}
