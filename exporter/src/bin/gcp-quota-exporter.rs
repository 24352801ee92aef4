//! GCP quota exporter binary

use anyhow::Context;
use config_loader::ConfigLoader;
use gcp_quota_exporter::{server, Config, Exporter, LogFormat};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_config();

    init_tracing(config.log_format);

    let load = match ConfigLoader::new(&config.config_path).load() {
        Ok(load) => load,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    info!(
        projects = load.projects.len(),
        rejected = load.rejected.len(),
        "Loaded config from {}",
        config.config_path.display()
    );

    let exporter = Exporter::from_config(&load, &config.compute_endpoint)
        .context("Failed to register quota collectors")?;

    info!("Starting gcp quota exporter on {}", config.listen_address);
    info!("Provide metrics on {}", config.telemetry_path);

    let app = server::create_app(Arc::new(exporter), &config.telemetry_path);

    if let Err(e) = server::serve(&config.listen_address, app).await {
        error!("ListenAndServe: {}", e);
        return Err(e);
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Txt => builder.init(),
    }
}
