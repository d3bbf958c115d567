/// A single usage session reported by a device.
///
/// Constructed once from a decoded telemetry payload and never mutated;
/// `esp_timestamp` is derived at construction time and stored alongside the
/// raw date/time strings. The surrogate key and `logged_at` column are
/// assigned by the database, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UsageEvent {
    pub client_id: String,
    /// `YYYY-MM-DD` as reported by the device.
    pub usage_date: String,
    /// `HH:MM:SS` as reported by the device.
    pub start_time: String,
    pub used_sec: i32,
    /// `usage_date` + `"T"` + `start_time`, stored as text.
    pub esp_timestamp: String,
}

impl UsageEvent {
    pub fn new(client_id: String, usage_date: String, start_time: String, used_sec: i32) -> Self {
        let esp_timestamp = format!("{usage_date}T{start_time}");
        Self {
            client_id,
            usage_date,
            start_time,
            used_sec,
            esp_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp_timestamp_joins_date_and_time_with_t() {
        let ev = UsageEvent::new(
            "dev1".to_string(),
            "2024-01-01".to_string(),
            "22:15:00".to_string(),
            120,
        );
        assert_eq!(ev.esp_timestamp, "2024-01-01T22:15:00");
        assert_eq!(ev.used_sec, 120);
    }
}
