use std::{
    env,
    fs::File,
    io::{BufRead, BufReader},
};

use anyhow::{bail, Context, Result};
use ingestion_service::{config::AppConfig, decode, observability, schema, sinks::MySqlUsageSink};
use sqlx::mysql::MySqlPoolOptions;

/// One-shot backfill: read telemetry payloads from an NDJSON file and run
/// them through the same decode + persist path as live ingestion. Rejected
/// lines are logged and skipped, matching the live loop's drop policy.
/// Storage errors abort the run instead: unlike the live loop the file can
/// be re-run once the database is healthy, and a dead connection should not
/// silently drop the remainder of the file.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_usage <ndjson_file_path>");
    }
    let file_path = &args[1];

    let cfg = AppConfig::load()?;
    schema::ensure_schema(&cfg.mysql).await?;

    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.mysql.max_connections)
        .connect_with(schema::database_options(&cfg.mysql))
        .await?;
    let sink = MySqlUsageSink::new(pool);

    let file = File::open(file_path).with_context(|| format!("failed to open {file_path}"))?;
    let reader = BufReader::new(file);

    let mut inserted: u64 = 0;
    let mut rejected: u64 = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match decode::decode(line.as_bytes()) {
            Ok(event) => {
                sink.persist(&event)
                    .await
                    .with_context(|| format!("insert failed at line {}", line_no + 1))?;
                inserted += 1;
            }
            Err(reason) => {
                rejected += 1;
                tracing::warn!(line = line_no + 1, reason = %reason, "skipping line");
            }
        }
    }

    tracing::info!(inserted, rejected, "backfill complete");
    Ok(())
}
