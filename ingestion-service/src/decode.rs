use serde::Deserialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use usage_client::UsageEvent;

const DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");
const TIME_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[hour]:[minute]:[second]");

/// Why a telemetry payload was dropped. Rejections are per-message and never
/// propagate past the receive loop.
#[derive(thiserror::Error, Debug)]
pub enum RejectReason {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("missing required fields: {}", missing.join(", "))]
    MissingField { missing: Vec<&'static str> },
    #[error("field '{field}' has invalid format: '{value}'")]
    InvalidFormat { field: &'static str, value: String },
}

impl RejectReason {
    /// Stable label for the rejection counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed",
            Self::MissingField { .. } => "missing_field",
            Self::InvalidFormat { .. } => "invalid_format",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    usage_date: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    used_sec: Option<i32>,
}

/// Decode and validate a raw telemetry payload.
///
/// The payload must be a UTF-8 JSON object carrying `client_id`,
/// `usage_date`, `start_time` and `used_sec`; absent, null or empty-string
/// fields are rejected (`used_sec` may be zero). Date and time strings must
/// match `YYYY-MM-DD` / `HH:MM:SS` exactly. No timezone interpretation and no
/// range check on `used_sec` beyond presence.
pub fn decode(raw: &[u8]) -> Result<UsageEvent, RejectReason> {
    let payload: RawPayload = serde_json::from_slice(raw)?;

    let mut missing = Vec::new();
    if payload.client_id.as_deref().is_none_or(str::is_empty) {
        missing.push("client_id");
    }
    if payload.usage_date.as_deref().is_none_or(str::is_empty) {
        missing.push("usage_date");
    }
    if payload.start_time.as_deref().is_none_or(str::is_empty) {
        missing.push("start_time");
    }
    if payload.used_sec.is_none() {
        missing.push("used_sec");
    }
    if !missing.is_empty() {
        return Err(RejectReason::MissingField { missing });
    }

    let client_id = payload.client_id.unwrap_or_default();
    let usage_date = payload.usage_date.unwrap_or_default();
    let start_time = payload.start_time.unwrap_or_default();
    let used_sec = payload.used_sec.unwrap_or_default();

    if time::Date::parse(&usage_date, DATE_FORMAT).is_err() {
        return Err(RejectReason::InvalidFormat {
            field: "usage_date",
            value: usage_date,
        });
    }
    if time::Time::parse(&start_time, TIME_FORMAT).is_err() {
        return Err(RejectReason::InvalidFormat {
            field: "start_time",
            value: start_time,
        });
    }

    Ok(UsageEvent::new(client_id, usage_date, start_time, used_sec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_payload_and_derives_esp_timestamp() {
        let raw =
            br#"{"client_id":"dev1","usage_date":"2024-01-01","start_time":"22:15:00","used_sec":120}"#;

        let ev = decode(raw).unwrap();
        assert_eq!(ev.client_id, "dev1");
        assert_eq!(ev.usage_date, "2024-01-01");
        assert_eq!(ev.start_time, "22:15:00");
        assert_eq!(ev.used_sec, 120);
        assert_eq!(ev.esp_timestamp, "2024-01-01T22:15:00");
    }

    #[test]
    fn zero_used_sec_is_accepted() {
        let raw =
            br#"{"client_id":"dev1","usage_date":"2024-01-01","start_time":"00:00:01","used_sec":0}"#;
        assert_eq!(decode(raw).unwrap().used_sec, 0);
    }

    #[test]
    fn rejects_unparsable_payload() {
        let res = decode(b"not-json");
        assert!(matches!(res, Err(RejectReason::MalformedPayload(_))));
    }

    #[test]
    fn rejects_payload_missing_fields_and_names_them() {
        let raw = br#"{"client_id":"dev1","usage_date":"2024-01-01"}"#;
        match decode(raw) {
            Err(RejectReason::MissingField { missing }) => {
                assert_eq!(missing, vec!["start_time", "used_sec"]);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn null_field_counts_as_missing() {
        let raw =
            br#"{"client_id":null,"usage_date":"2024-01-01","start_time":"22:15:00","used_sec":1}"#;
        match decode(raw) {
            Err(RejectReason::MissingField { missing }) => {
                assert_eq!(missing, vec!["client_id"]);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn empty_client_id_counts_as_missing() {
        let raw =
            br#"{"client_id":"","usage_date":"2024-01-01","start_time":"22:15:00","used_sec":1}"#;
        assert!(matches!(
            decode(raw),
            Err(RejectReason::MissingField { .. })
        ));
    }

    #[test]
    fn rejects_badly_formatted_date() {
        let raw =
            br#"{"client_id":"dev1","usage_date":"01/02/2024","start_time":"22:15:00","used_sec":1}"#;
        match decode(raw) {
            Err(RejectReason::InvalidFormat { field, .. }) => assert_eq!(field, "usage_date"),
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }

    #[test]
    fn rejects_badly_formatted_time() {
        let raw =
            br#"{"client_id":"dev1","usage_date":"2024-01-01","start_time":"25:99:00","used_sec":1}"#;
        match decode(raw) {
            Err(RejectReason::InvalidFormat { field, .. }) => assert_eq!(field, "start_time"),
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }
}
