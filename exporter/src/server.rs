//! HTTP exposition endpoint

use crate::exporter::Exporter;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Create the router serving metrics on `telemetry_path`
pub fn create_app(exporter: Arc<Exporter>, telemetry_path: &str) -> Router {
    Router::new()
        .route(telemetry_path, get(metrics_handler))
        .with_state(exporter)
        .layer(TraceLayer::new_for_http())
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> Response {
    match exporter.scrape().await {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Bind `addr` and serve until the process is terminated
pub async fn serve(addr: &str, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
