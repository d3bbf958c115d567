use std::time::Instant;

use sqlx::MySqlPool;
use usage_client::UsageEvent;

#[derive(thiserror::Error, Debug)]
#[error("usage insert failed: {0}")]
pub struct StorageError(#[from] sqlx::Error);

/// Writes validated usage events into the `usage_logs` table.
///
/// Connections are acquired from the pool per event and returned on every
/// exit path when the transaction handle drops. Each event becomes exactly
/// one row; the database assigns `id` and `logged_at`.
pub struct MySqlUsageSink {
    pool: MySqlPool,
}

impl MySqlUsageSink {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn persist(&self, event: &UsageEvent) -> Result<(), StorageError> {
        let started = Instant::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO usage_logs (client_id, usage_date, start_time, used_sec, esp_timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.client_id)
        .bind(&event.usage_date)
        .bind(&event.start_time)
        .bind(event.used_sec)
        .bind(&event.esp_timestamp)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        metrics::counter!("usage_rows_inserted_total").increment(1);
        metrics::histogram!("usage_insert_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        tracing::debug!(
            client_id = %event.client_id,
            esp_timestamp = %event.esp_timestamp,
            used_sec = event.used_sec,
            "usage event saved"
        );
        Ok(())
    }
}
