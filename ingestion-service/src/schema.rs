use anyhow::Context;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{ConnectOptions, Connection};

use crate::config::MySqlConfig;

pub const USAGE_TABLE: &str = "usage_logs";

fn create_table_ddl(table: &str) -> String {
    // logged_at is the server-side receive time; esp_timestamp is the
    // device-reported time kept as text.
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INT AUTO_INCREMENT PRIMARY KEY,
            client_id VARCHAR(255),
            usage_date VARCHAR(10),
            start_time VARCHAR(8),
            used_sec INT,
            esp_timestamp VARCHAR(20),
            logged_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
        "#
    )
}

fn server_options(cfg: &MySqlConfig) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.user)
        .password(&cfg.password)
}

/// Connection options for the named database; pool builders start from this.
pub fn database_options(cfg: &MySqlConfig) -> MySqlConnectOptions {
    server_options(cfg).database(&cfg.database)
}

/// Ensure the database and usage table exist. Runs once at startup, before
/// the broker connector; any failure here is fatal. Idempotent, so repeated
/// startups against an initialized server are no-ops.
pub async fn ensure_schema(cfg: &MySqlConfig) -> anyhow::Result<()> {
    // Server-level connection, no database selected yet.
    let mut conn = server_options(cfg)
        .connect()
        .await
        .context("failed to connect to MySQL server for schema init")?;

    let create_db = format!(
        "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
        cfg.database
    );
    sqlx::query(&create_db)
        .execute(&mut conn)
        .await
        .with_context(|| format!("failed to create database '{}'", cfg.database))?;
    conn.close().await.ok();

    tracing::info!(database = %cfg.database, "database checked/created");

    let mut conn = server_options(cfg)
        .database(&cfg.database)
        .connect()
        .await
        .with_context(|| format!("failed to connect to database '{}'", cfg.database))?;

    sqlx::query(&create_table_ddl(USAGE_TABLE))
        .execute(&mut conn)
        .await
        .with_context(|| format!("failed to create table '{USAGE_TABLE}'"))?;
    conn.close().await.ok();

    tracing::info!(table = USAGE_TABLE, database = %cfg.database, "schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ddl_defines_surrogate_key_and_server_timestamp() {
        let ddl = create_table_ddl(USAGE_TABLE);
        assert!(ddl.contains("IF NOT EXISTS usage_logs"));
        assert!(ddl.contains("id INT AUTO_INCREMENT PRIMARY KEY"));
        assert!(ddl.contains("logged_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP"));
    }
}
