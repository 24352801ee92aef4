//! GCP quota exporter - republishes Compute Engine quotas as Prometheus gauges
//!
//! Every scrape of the telemetry path queries the project and region quota
//! endpoints of each configured project and reports limits, usage and
//! per-source availability. Nothing is cached between scrapes.

pub mod client;
pub mod collector;
pub mod config;
pub mod credentials;
pub mod exporter;
pub mod metrics;
pub mod server;

pub use client::{ComputeQuotaClient, QuotaClient, QuotaError};
pub use collector::{ProjectReport, QuotaCollector};
pub use config::{Config, LogFormat};
pub use exporter::{Exporter, ExporterError};
