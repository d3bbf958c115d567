use anyhow::Result;
use sqlx::MySqlPool;
use time::OffsetDateTime;

/// A stored usage row, including the server-assigned columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageLogRow {
    pub id: i32,
    pub client_id: String,
    pub usage_date: String,
    pub start_time: String,
    pub used_sec: i32,
    pub esp_timestamp: String,
    pub logged_at: OffsetDateTime,
}

/// Total usage per calendar day.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyUsage {
    pub usage_date: String,
    pub total_sec: i64,
}

/// Fetch the most recent usage rows, newest first by device-reported time.
pub async fn recent_usage(pool: &MySqlPool, limit: u32) -> Result<Vec<UsageLogRow>> {
    let rows = sqlx::query_as::<_, UsageLogRow>(
        r#"
        SELECT
            id,
            client_id,
            usage_date,
            start_time,
            used_sec,
            esp_timestamp,
            logged_at
        FROM usage_logs
        ORDER BY usage_date DESC, start_time DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Aggregate total used seconds per day, oldest day first.
pub async fn daily_usage_totals(pool: &MySqlPool) -> Result<Vec<DailyUsage>> {
    // SUM over INT yields DECIMAL in MySQL; cast back to a signed integer so
    // the row maps onto i64.
    let rows = sqlx::query_as::<_, DailyUsage>(
        r#"
        SELECT
            usage_date,
            CAST(SUM(used_sec) AS SIGNED) AS total_sec
        FROM usage_logs
        GROUP BY usage_date
        ORDER BY usage_date
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
