use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    /// Telemetry topic the bridge subscribes to.
    pub data_topic: String,
    /// Control topic the dashboard publishes timer settings to.
    pub timer_topic: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_max_connect_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MySqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

fn default_mysql_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    pub bind_addr: String,
    #[serde(default = "default_timer_minutes")]
    pub default_timer_minutes: u16,
}

fn default_timer_minutes() -> u16 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub mysql: MySqlConfig,
    pub dashboard: DashboardConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path =
            env::var("INGESTION_CONFIG").unwrap_or_else(|_| "ingestion-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config_and_fills_retry_defaults() {
        let toml_src = r#"
            [mqtt]
            host = "broker.local"
            port = 1883
            client_id_prefix = "usage-logger"
            data_topic = "sleep_sense/data"
            timer_topic = "/phone/timer_setting"

            [mysql]
            host = "localhost"
            user = "root"
            password = "secret"
            database = "sleep_db"
            max_connections = 4

            [dashboard]
            bind_addr = "127.0.0.1:8080"
        "#;

        let cfg: AppConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.mqtt.max_connect_retries, 5);
        assert_eq!(cfg.mqtt.retry_delay_secs, 5);
        assert_eq!(cfg.mysql.port, 3306);
        assert_eq!(cfg.dashboard.default_timer_minutes, 5);
        assert!(cfg.metrics.is_none());
    }
}
