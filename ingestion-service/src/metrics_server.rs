use std::net::SocketAddr;

use anyhow::Context;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and serve `/metrics` on `bind_addr` in a
/// background task. Called at most once per process, before any counter is
/// touched.
pub fn init(bind_addr: &str) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;
    let _ = PROM_HANDLE.set(handle);

    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid metrics bind address '{bind_addr}'"))?;

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(render_metrics));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

async fn render_metrics() -> String {
    PROM_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}
