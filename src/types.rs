use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::remote::RetryPolicy;

/// A flat record as the store returns it: storage field name -> JSON value.
pub type Record = serde_json::Map<String, Value>;

/// UI-owned filter state: filter key -> raw user value, in the order the
/// filters were declared on screen.
pub type FilterState = Vec<(String, String)>;

/// Configuration stored in ~/.crmdesk/config.json
///
/// Accepts both the SDK-style keys (`apperProjectId`, `apperPublicKey`) and
/// the short ones for backwards compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, alias = "apperProjectId")]
    pub project_id: String,
    #[serde(default, alias = "apperPublicKey")]
    pub public_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    "https://api.apper.io/v1/".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            public_key: String::new(),
            base_url: default_base_url(),
            backend: Backend::default(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Which record store implementation backs the services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Remote,
    Mock,
}

// ---------------------------------------------------------------------------
// Record field access
// ---------------------------------------------------------------------------

/// String form of a field for text matching. Numbers are stringified,
/// lookup objects resolve to their `Name`; null and missing are `None`.
pub fn field_text(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(obj) => obj.get("Name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Numeric value of a field. Numeric strings are accepted; anything else is `None`.
pub fn field_number(record: &Record, field: &str) -> Option<f64> {
    match record.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Integer id of a reference field, whether stored bare or as `{Id, Name}`.
pub fn field_reference(record: &Record, field: &str) -> Option<i64> {
    match record.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get("Id").and_then(Value::as_i64),
        _ => None,
    }
}

/// Calendar day of a date or timestamp field.
pub fn field_date(record: &Record, field: &str) -> Option<NaiveDate> {
    record.get(field)?.as_str().and_then(parse_calendar_date)
}

/// Parse `YYYY-MM-DD`, RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` into a day.
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    parse_instant(raw).map(|dt| dt.date_naive())
}

pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_field_reference_accepts_lookup_object() {
        let r = record(json!({"contact_c": {"Id": 7, "Name": "Acme"}, "deal_c": 3, "x_c": "12"}));
        assert_eq!(field_reference(&r, "contact_c"), Some(7));
        assert_eq!(field_reference(&r, "deal_c"), Some(3));
        assert_eq!(field_reference(&r, "x_c"), Some(12));
        assert_eq!(field_text(&r, "contact_c").as_deref(), Some("Acme"));
    }

    #[test]
    fn test_field_number_rejects_non_numeric() {
        let r = record(json!({"a": "25000", "b": "lots", "c": null, "d": 1.5}));
        assert_eq!(field_number(&r, "a"), Some(25000.0));
        assert_eq!(field_number(&r, "b"), None);
        assert_eq!(field_number(&r, "c"), None);
        assert_eq!(field_number(&r, "d"), Some(1.5));
    }

    #[test]
    fn test_parse_calendar_date_formats() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        assert_eq!(parse_calendar_date("2024-05-17"), Some(day));
        assert_eq!(parse_calendar_date("2024-05-17T10:30"), Some(day));
        assert_eq!(parse_calendar_date("2024-05-17T10:30:00.000Z"), Some(day));
        assert_eq!(parse_calendar_date("May 17"), None);
        assert_eq!(parse_calendar_date(""), None);
    }

    #[test]
    fn test_config_defaults_and_aliases() {
        let config: Config =
            serde_json::from_str(r#"{"apperProjectId": "p1", "apperPublicKey": "k1"}"#).unwrap();
        assert_eq!(config.project_id, "p1");
        assert_eq!(config.public_key, "k1");
        assert_eq!(config.backend, Backend::Remote);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
    }
}
