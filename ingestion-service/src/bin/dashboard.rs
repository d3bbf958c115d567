use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ingestion_service::{
    config::AppConfig,
    control::{TimerPublisher, TimerSetting},
    observability, schema,
};
use rumqttc::{AsyncClient, MqttOptions};
use sqlx::mysql::MySqlPoolOptions;
use tokio::sync::RwLock;
use usage_client::db::usage_queries::{self, DailyUsage};

#[derive(Clone)]
struct DashboardState {
    pool: sqlx::MySqlPool,
    publisher: Arc<TimerPublisher>,
    /// Last timer value pushed to devices. Shared, explicitly passed state
    /// rather than a process-global.
    timer_minutes: Arc<RwLock<u16>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.mysql.max_connections)
        .connect_with(schema::database_options(&cfg.mysql))
        .await?;

    let client_id = format!(
        "{}-dashboard-{}",
        cfg.mqtt.client_id_prefix,
        std::process::id()
    );
    let mut opts = MqttOptions::new(client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs));
    let (client, mut eventloop) = AsyncClient::new(opts, 16);

    // The publish-only client still needs its event loop driven; rumqttc
    // reconnects by itself as long as polling continues.
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                tracing::warn!(error = %e, "dashboard mqtt event loop error");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    });

    let state = DashboardState {
        pool,
        publisher: Arc::new(TimerPublisher::new(client, cfg.mqtt.timer_topic.clone())),
        timer_minutes: Arc::new(RwLock::new(cfg.dashboard.default_timer_minutes)),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/api/set_timer", post(set_timer))
        .route("/usage", get(usage_page))
        .route("/usage/chart.svg", get(usage_chart))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.dashboard.bind_addr).await?;
    tracing::info!(addr = %cfg.dashboard.bind_addr, "dashboard listening");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

const INDEX_HTML: &str = r#"<html>
<head><title>Timer Setting</title></head>
<body>
  <h2>Set Smartphone Usage Timer (minutes)</h2>
  <form id="timerForm">
    <input type="number" id="timerInput" value="{timer}" min="1" max="180" />
    <button type="submit">Set</button>
  </form>
  <p id="result"></p>
  <a href="/usage">View Usage Records</a>

  <script>
    const form = document.getElementById('timerForm');
    const input = document.getElementById('timerInput');
    const result = document.getElementById('result');

    form.addEventListener('submit', e => {
      e.preventDefault();
      fetch('/api/set_timer', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({timer: Number(input.value)})
      })
      .then(res => res.json())
      .then(data => {
        result.textContent = data.message;
      });
    });
  </script>
</body>
</html>
"#;

async fn index(State(state): State<DashboardState>) -> Html<String> {
    let timer = *state.timer_minutes.read().await;
    Html(INDEX_HTML.replace("{timer}", &timer.to_string()))
}

#[derive(serde::Serialize)]
struct SetTimerResponse {
    message: String,
}

/// Accepts only a JSON integer `timer` within bounds; floats, strings and a
/// missing field are all rejected the same way.
fn parse_timer_request(body: &serde_json::Value) -> Option<TimerSetting> {
    body.get("timer")
        .and_then(serde_json::Value::as_i64)
        .and_then(|minutes| TimerSetting::new(minutes).ok())
}

async fn set_timer(
    State(state): State<DashboardState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let setting = match parse_timer_request(&body) {
        Some(setting) => setting,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SetTimerResponse {
                    message: "Please enter a value between 1 and 180.".to_string(),
                }),
            )
                .into_response();
        }
    };

    if let Err(e) = state.publisher.publish(setting).await {
        tracing::error!(error = %e, "failed to publish timer setting");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SetTimerResponse {
                message: "Failed to publish timer setting.".to_string(),
            }),
        )
            .into_response();
    }

    *state.timer_minutes.write().await = setting.minutes();
    Json(SetTimerResponse {
        message: format!("Timer set to {} minutes.", setting.minutes()),
    })
    .into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

async fn usage_page(State(state): State<DashboardState>) -> Html<String> {
    // A failed query renders an empty table rather than an error page.
    let rows = match usage_queries::recent_usage(&state.pool, 100).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "failed to load usage rows");
            Vec::new()
        }
    };

    let mut table = String::new();
    for row in &rows {
        let logged_at = row
            .logged_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        table.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            row.id,
            html_escape(&row.client_id),
            html_escape(&row.usage_date),
            html_escape(&row.start_time),
            row.used_sec,
            html_escape(&row.esp_timestamp),
            logged_at,
        ));
    }

    Html(format!(
        r#"<html>
<head>
  <title>Usage Records</title>
  <style>
    table, th, td {{ border: 1px solid black; border-collapse: collapse; padding: 5px; }}
    th {{ background-color: #eee; }}
  </style>
</head>
<body>
  <h2>Daily Smartphone Usage Time</h2>
  <img src="/usage/chart.svg" alt="Usage Chart" />
  <p><a href="/">Back to Timer Setting</a></p>
  <table>
    <tr><th>id</th><th>client</th><th>date</th><th>start</th><th>used (sec)</th><th>device time</th><th>logged at</th></tr>
    {table}
  </table>
</body>
</html>
"#
    ))
}

async fn usage_chart(State(state): State<DashboardState>) -> Response {
    let days = match usage_queries::daily_usage_totals(&state.pool).await {
        Ok(days) => days,
        Err(e) => {
            tracing::error!(error = %e, "failed to aggregate daily usage");
            Vec::new()
        }
    };

    let svg = render_daily_chart(&days);
    ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()
}

/// Render per-day usage totals as a bar chart, one bar per day, labelled in
/// minutes.
fn render_daily_chart(days: &[DailyUsage]) -> String {
    const BAR_WIDTH: i64 = 40;
    const BAR_GAP: i64 = 25;
    const PLOT_HEIGHT: i64 = 240;
    const TOP: i64 = 40;
    const BOTTOM: i64 = 40;

    let width = (days.len() as i64 * (BAR_WIDTH + BAR_GAP) + BAR_GAP).max(300);
    let height = TOP + PLOT_HEIGHT + BOTTOM;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">
<text x="10" y="24" font-size="16" font-family="sans-serif">Daily usage (minutes)</text>
"#
    );

    if days.is_empty() {
        svg.push_str(&format!(
            r#"<text x="10" y="{}" font-size="14" font-family="sans-serif">No usage data</text>"#,
            TOP + PLOT_HEIGHT / 2
        ));
        svg.push('\n');
    } else {
        let max_sec = days.iter().map(|d| d.total_sec).max().unwrap_or(0).max(1);
        for (i, day) in days.iter().enumerate() {
            let x = BAR_GAP + i as i64 * (BAR_WIDTH + BAR_GAP);
            let bar_h = day.total_sec * PLOT_HEIGHT / max_sec;
            let y = TOP + PLOT_HEIGHT - bar_h;
            let minutes = (day.total_sec + 30) / 60;
            svg.push_str(&format!(
                r##"<rect x="{x}" y="{y}" width="{BAR_WIDTH}" height="{bar_h}" fill="#4c72b0"/>
<text x="{x}" y="{}" font-size="11" font-family="sans-serif">{minutes}</text>
<text x="{x}" y="{}" font-size="10" font-family="sans-serif">{}</text>
"##,
                y - 5,
                TOP + PLOT_HEIGHT + 16,
                html_escape(&day.usage_date),
            ));
        }
    }

    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_renders_one_bar_per_day() {
        let days = vec![
            DailyUsage {
                usage_date: "2024-01-01".to_string(),
                total_sec: 600,
            },
            DailyUsage {
                usage_date: "2024-01-02".to_string(),
                total_sec: 1200,
            },
        ];

        let svg = render_daily_chart(&days);
        assert_eq!(svg.matches("<rect").count(), 2);
        assert!(svg.contains("2024-01-01"));
        assert!(svg.contains("2024-01-02"));
        // 1200 seconds is 20 minutes.
        assert!(svg.contains(">20<"));
    }

    #[test]
    fn chart_handles_empty_data() {
        let svg = render_daily_chart(&[]);
        assert!(svg.contains("No usage data"));
        assert!(!svg.contains("<rect"));
    }

    #[test]
    fn escapes_html_in_labels() {
        assert_eq!(html_escape("<b>&x"), "&lt;b&gt;&amp;x");
    }

    #[test]
    fn timer_request_accepts_integer_in_range() {
        let body = serde_json::json!({ "timer": 90 });
        assert_eq!(parse_timer_request(&body).unwrap().minutes(), 90);
    }

    #[test]
    fn timer_request_rejects_non_integer_values() {
        for body in [
            serde_json::json!({ "timer": 5.5 }),
            serde_json::json!({ "timer": "5" }),
            serde_json::json!({ "timer": null }),
            serde_json::json!({}),
        ] {
            assert!(parse_timer_request(&body).is_none());
        }
    }

    #[test]
    fn timer_request_rejects_out_of_range_values() {
        assert!(parse_timer_request(&serde_json::json!({ "timer": 0 })).is_none());
        assert!(parse_timer_request(&serde_json::json!({ "timer": 181 })).is_none());
    }
}
