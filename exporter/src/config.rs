//! Command-line and environment configuration for the exporter

use crate::client::DEFAULT_COMPUTE_ENDPOINT;
use clap::{CommandFactory, Parser};
use std::convert::Infallible;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/prometheus-exporter-gcp-quota.yaml";
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9593";
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

/// Log output format. Anything other than `json` selects text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Txt,
    Json,
}

impl FromStr for LogFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "json" => LogFormat::Json,
            _ => LogFormat::Txt,
        })
    }
}

fn parse_telemetry_path(s: &str) -> Result<String, String> {
    if s.starts_with('/') {
        Ok(s.to_string())
    } else {
        Err(format!("telemetry path must start with '/': {}", s))
    }
}

/// Configuration for the quota exporter
#[derive(Debug, Clone, Parser)]
#[command(name = "gcp-quota-exporter")]
#[command(about = "Exports Google Cloud project and region quotas as Prometheus metrics")]
pub struct Config {
    /// Path to the project list (YAML)
    #[arg(long = "config", env = "GCP_QUOTA_EXPORTER_CONFIG_", default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,

    /// Address to listen on for web interface and telemetry
    #[arg(
        long = "web.listen-address",
        env = "GCP_QUOTA_EXPORTER_WEB_LISTEN_ADDRESS",
        default_value = DEFAULT_LISTEN_ADDRESS
    )]
    pub listen_address: String,

    /// Path under which to expose metrics
    #[arg(
        long = "web.telemetry-path",
        env = "GCP_QUOTA_EXPORTER_WEB_TELEMETRY_PATH",
        default_value = DEFAULT_TELEMETRY_PATH,
        value_parser = parse_telemetry_path
    )]
    pub telemetry_path: String,

    /// Log format, valid options are txt and json
    #[arg(long = "log-format", env = "GCP_QUOTA_EXPORTER_LOG_FORMAT", default_value = "txt")]
    pub log_format: LogFormat,

    /// Compute API base URL
    #[arg(
        long = "compute.endpoint",
        env = "GCP_QUOTA_EXPORTER_COMPUTE_ENDPOINT",
        default_value = DEFAULT_COMPUTE_ENDPOINT
    )]
    pub compute_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            log_format: LogFormat::Txt,
            compute_endpoint: DEFAULT_COMPUTE_ENDPOINT.to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse_from(normalize_args(std::env::args_os()))
    }
}

/// Rewrite single-dash long options (`-config`, `-web.listen-address=...`)
/// into their `--` form. Short flags and values are left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let command = Config::command();
    let longs: Vec<&str> = command.get_arguments().filter_map(|a| a.get_long()).collect();

    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            let rewritten = arg.to_str().and_then(|s| {
                let name = s.strip_prefix('-').filter(|rest| !rest.starts_with('-'))?;
                let flag = name.split('=').next().unwrap_or(name);
                longs.contains(&flag).then(|| OsString::from(format!("-{}", s)))
            });
            rewritten.unwrap_or(arg)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("txt".parse::<LogFormat>(), Ok(LogFormat::Txt));
        assert_eq!("logfmt".parse::<LogFormat>(), Ok(LogFormat::Txt));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "gcp-quota-exporter",
            "--config",
            "/tmp/quota.yaml",
            "--web.listen-address",
            "127.0.0.1:9999",
            "--web.telemetry-path",
            "/quota",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(config.config_path, PathBuf::from("/tmp/quota.yaml"));
        assert_eq!(config.listen_address, "127.0.0.1:9999");
        assert_eq!(config.telemetry_path, "/quota");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_single_dash_long_flags_accepted() {
        let args = normalize_args([
            "gcp-quota-exporter",
            "-config",
            "/x",
            "-web.listen-address=127.0.0.1:1",
            "-log-format",
            "json",
        ]);
        let config = Config::try_parse_from(args).unwrap();

        assert_eq!(config.config_path, PathBuf::from("/x"));
        assert_eq!(config.listen_address, "127.0.0.1:1");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_normalize_leaves_other_args_alone() {
        let args = normalize_args(["gcp-quota-exporter", "--config", "-h", "-", "-unknown"]);
        assert_eq!(
            args,
            vec!["gcp-quota-exporter", "--config", "-h", "-", "-unknown"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_relative_telemetry_path_rejected() {
        let result =
            Config::try_parse_from(["gcp-quota-exporter", "--web.telemetry-path", "metrics"]);
        assert!(result.is_err());
    }
}
