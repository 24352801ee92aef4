//! Gauge families exposed on the telemetry path
//!
//! Every scrape gets a fresh [`ScrapeGauges`], so label sets from earlier
//! scrapes never leak into later responses.

use crate::collector::ProjectReport;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

pub const CONFIG_ERR_METRIC: &str = "gcp_quota_config_err";
pub const LIMIT_METRIC: &str = "gcp_quota_limit";
pub const USAGE_METRIC: &str = "gcp_quota_usage";
pub const PROJECT_UP_METRIC: &str = "gcp_quota_project_up";
pub const REGIONS_UP_METRIC: &str = "gcp_quota_regions_up";

const QUOTA_LABELS: &[&str] = &["project", "region", "metric"];

/// Per-scrape metric set.
pub struct ScrapeGauges {
    registry: Registry,
    config_err: Gauge,
    limit: GaugeVec,
    usage: GaugeVec,
    project_up: GaugeVec,
    regions_up: GaugeVec,
}

impl ScrapeGauges {
    /// Build and register all descriptors. Fails on an invalid or conflicting descriptor.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let config_err = Gauge::with_opts(Opts::new(
            CONFIG_ERR_METRIC,
            "Number errors in exporter config",
        ))?;
        let limit = GaugeVec::new(
            Opts::new(LIMIT_METRIC, "quota limits for GCP components"),
            QUOTA_LABELS,
        )?;
        let usage = GaugeVec::new(
            Opts::new(USAGE_METRIC, "quota usage for GCP components"),
            QUOTA_LABELS,
        )?;
        let project_up = GaugeVec::new(
            Opts::new(
                PROJECT_UP_METRIC,
                "Was the last scrape of the Google Project API successful.",
            ),
            &["project"],
        )?;
        let regions_up = GaugeVec::new(
            Opts::new(
                REGIONS_UP_METRIC,
                "Was the last scrape of the Google Regions API successful.",
            ),
            &["project", "region"],
        )?;

        registry.register(Box::new(config_err.clone()))?;
        registry.register(Box::new(limit.clone()))?;
        registry.register(Box::new(usage.clone()))?;
        registry.register(Box::new(project_up.clone()))?;
        registry.register(Box::new(regions_up.clone()))?;

        Ok(Self {
            registry,
            config_err,
            limit,
            usage,
            project_up,
            regions_up,
        })
    }

    pub fn set_config_errors(&self, count: u64) {
        self.config_err.set(count as f64);
    }

    pub fn record(&self, report: &ProjectReport) {
        for sample in &report.samples {
            let labels = [
                sample.project.as_str(),
                sample.region.as_str(),
                sample.metric.as_str(),
            ];
            self.limit.with_label_values(&labels).set(sample.limit);
            self.usage.with_label_values(&labels).set(sample.usage);
        }

        self.project_up
            .with_label_values(&[report.project.as_str()])
            .set(up_value(report.project_up));

        for (region, up) in &report.regions_up {
            self.regions_up
                .with_label_values(&[report.project.as_str(), region.as_str()])
                .set(up_value(*up));
        }
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Render in the text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn up_value(up: bool) -> f64 {
    if up {
        1.0
    } else {
        0.0
    }
}
