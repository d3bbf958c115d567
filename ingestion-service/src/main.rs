use anyhow::Result;
use ingestion_service::{
    config::AppConfig, connector::MqttConnector, metrics_server, observability, schema,
    sinks::MySqlUsageSink,
};
use sqlx::mysql::MySqlPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    // Fail fast: never subscribe to the broker before storage is ready.
    schema::ensure_schema(&cfg.mysql).await?;

    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.mysql.max_connections)
        .connect_with(schema::database_options(&cfg.mysql))
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, requesting shutdown");
            let _ = shutdown_tx.send(true);
        }
    });

    let connector = MqttConnector::new(cfg.mqtt, MySqlUsageSink::new(pool), shutdown_rx);
    connector.run().await
}
