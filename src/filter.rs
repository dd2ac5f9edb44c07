//! Client-side filtering and sorting over fetched records.
//!
//! Used where a screen already holds the full collection: search-as-you-type
//! on contacts, date-range and value-range filters on deals, column sorting.
//! Every filter is an independent boolean predicate over one record, so
//! combined filters are a plain AND and application order does not matter.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde_json::Value;

use crate::query::ValueRange;
use crate::types::{field_date, field_number, field_text, parse_instant, Record};

/// A field that participates in text search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchField {
    pub name: &'static str,
    /// Match the raw query without lowercasing (phone numbers).
    pub exact: bool,
}

impl SearchField {
    pub const fn text(name: &'static str) -> Self {
        Self { name, exact: false }
    }

    pub const fn exact(name: &'static str) -> Self {
        Self { name, exact: true }
    }
}

fn matches_search(record: &Record, query: &str, fields: &[SearchField]) -> bool {
    let needle = query.to_lowercase();
    fields.iter().any(|field| match field_text(record, field.name) {
        Some(value) if field.exact => value.contains(query),
        Some(value) => value.to_lowercase().contains(&needle),
        None => false,
    })
}

/// Records where `query` is a substring of any of `fields`. A blank query
/// returns the input unchanged.
pub fn search(records: &[Record], query: &str, fields: &[SearchField]) -> Vec<Record> {
    let query = query.trim();
    if query.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| matches_search(r, query, fields))
        .cloned()
        .collect()
}

/// Calendar windows relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    /// Sunday through Saturday of the current week.
    ThisWeek,
    ThisMonth,
    ThisQuarter,
}

impl DateRange {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "this-week" => Some(DateRange::ThisWeek),
            "this-month" => Some(DateRange::ThisMonth),
            "this-quarter" => Some(DateRange::ThisQuarter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::ThisWeek => "this-week",
            DateRange::ThisMonth => "this-month",
            DateRange::ThisQuarter => "this-quarter",
        }
    }

    pub fn contains(&self, day: NaiveDate, today: NaiveDate) -> bool {
        match self {
            DateRange::ThisWeek => {
                let start = today - Duration::days(today.weekday().num_days_from_sunday() as i64);
                let end = start + Duration::days(6);
                start <= day && day <= end
            }
            DateRange::ThisMonth => day.year() == today.year() && day.month() == today.month(),
            DateRange::ThisQuarter => {
                day.year() == today.year() && quarter_index(day) == quarter_index(today)
            }
        }
    }
}

fn quarter_index(day: NaiveDate) -> u32 {
    day.month0() / 3
}

/// Records whose `date_field` falls in `range`. Missing or unparsable dates
/// never match.
pub fn filter_by_date_range(
    records: &[Record],
    date_field: &str,
    range: DateRange,
    today: NaiveDate,
) -> Vec<Record> {
    records
        .iter()
        .filter(|r| field_date(r, date_field).is_some_and(|d| range.contains(d, today)))
        .cloned()
        .collect()
}

/// Records whose `value_field` lies in the `"min-max"` range (missing counts
/// as 0). A malformed range string applies no constraint.
pub fn filter_by_value_range(records: &[Record], value_field: &str, range: &str) -> Vec<Record> {
    let Some(range) = ValueRange::parse(range) else {
        if !range.trim().is_empty() {
            log::warn!("Ignoring malformed value range {:?}", range);
        }
        return records.to_vec();
    };
    records
        .iter()
        .filter(|r| range.contains(field_number(r, value_field).unwrap_or(0.0)))
        .cloned()
        .collect()
}

/// Combined client-side filter. Unset parts don't constrain.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub search: Option<(String, Vec<SearchField>)>,
    pub date_range: Option<(String, DateRange)>,
    pub value_range: Option<(String, ValueRange)>,
}

impl RecordFilter {
    pub fn search(mut self, query: &str, fields: &[SearchField]) -> Self {
        let query = query.trim();
        self.search = (!query.is_empty()).then(|| (query.to_string(), fields.to_vec()));
        self
    }

    pub fn date_range(mut self, field: &str, bucket: &str) -> Self {
        self.date_range = DateRange::parse(bucket).map(|range| (field.to_string(), range));
        self
    }

    pub fn value_range(mut self, field: &str, range: &str) -> Self {
        self.value_range = ValueRange::parse(range).map(|range| (field.to_string(), range));
        self
    }

    pub fn matches(&self, record: &Record, today: NaiveDate) -> bool {
        let search_ok = self
            .search
            .as_ref()
            .map_or(true, |(query, fields)| matches_search(record, query, fields));
        let date_ok = self.date_range.as_ref().map_or(true, |(field, range)| {
            field_date(record, field).is_some_and(|d| range.contains(d, today))
        });
        let value_ok = self.value_range.as_ref().map_or(true, |(field, range)| {
            range.contains(field_number(record, field).unwrap_or(0.0))
        });
        search_ok && date_ok && value_ok
    }

    pub fn apply(&self, records: &[Record], today: NaiveDate) -> Vec<Record> {
        records
            .iter()
            .filter(|r| self.matches(r, today))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key of one field value. Values of different kinds order by kind:
/// null, bool, number, timestamp, text, list, lookup.
enum SortKey {
    Null,
    Bool(bool),
    Number(f64),
    Instant(DateTime<Utc>),
    Text(String),
    List,
    Lookup(String),
}

impl SortKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => SortKey::Null,
            Value::Bool(b) => SortKey::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(SortKey::Null, SortKey::Number),
            // Older rows carry numbers as strings.
            Value::String(s) => match s.trim().parse::<f64>().ok().filter(|v| v.is_finite()) {
                Some(n) => SortKey::Number(n),
                None => match parse_instant(s) {
                    Some(instant) => SortKey::Instant(instant),
                    None => SortKey::Text(s.to_lowercase()),
                },
            },
            Value::Array(_) => SortKey::List,
            Value::Object(o) => {
                SortKey::Lookup(o.get("Name").and_then(Value::as_str).unwrap_or("").to_lowercase())
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Bool(_) => 1,
            SortKey::Number(_) => 2,
            SortKey::Instant(_) => 3,
            SortKey::Text(_) => 4,
            SortKey::List => 5,
            SortKey::Lookup(_) => 6,
        }
    }
}

/// Order two field values: numbers (and numeric strings) numerically, date
/// strings chronologically, other strings case-insensitively, lookup objects
/// by `Name`. A total order, so it is safe to hand to `sort_by`.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (SortKey::of(a), SortKey::of(b)) {
        (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(&y),
        (SortKey::Number(x), SortKey::Number(y)) => x.total_cmp(&y),
        (SortKey::Instant(x), SortKey::Instant(y)) => x.cmp(&y),
        (SortKey::Text(x), SortKey::Text(y)) | (SortKey::Lookup(x), SortKey::Lookup(y)) => {
            x.cmp(&y)
        }
        (x, y) => x.rank().cmp(&y.rank()),
    }
}

/// Compare one field of two records. Missing or null values go last in
/// either direction.
pub fn compare_field(a: &Record, b: &Record, field: &str, direction: SortDirection) -> Ordering {
    let va = a.get(field).filter(|v| !v.is_null());
    let vb = b.get(field).filter(|v| !v.is_null());
    match (va, vb) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match direction {
            SortDirection::Asc => compare_values(x, y),
            SortDirection::Desc => compare_values(y, x),
        },
    }
}

/// Sort by one field. Records missing the field (or holding null) go last in
/// either direction.
pub fn sort_records(records: &mut [Record], field: &str, direction: SortDirection) {
    records.sort_by(|a, b| compare_field(a, b, field, direction));
}

/// A due date is overdue when it is in the past and not today.
pub fn is_overdue(due: &str, now: DateTime<Utc>) -> bool {
    match parse_instant(due) {
        Some(instant) => instant < now && instant.date_naive() != now.date_naive(),
        None => false,
    }
}

/// `is_overdue` for a record field; missing dates are never overdue.
pub fn record_is_overdue(record: &Record, field: &str, now: DateTime<Utc>) -> bool {
    field_text(record, field).is_some_and(|due| is_overdue(&due, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const CONTACT_FIELDS: &[SearchField] = &[
        SearchField::text("company_c"),
        SearchField::text("contact_person_c"),
        SearchField::text("email_c"),
        SearchField::exact("phone_c"),
    ];

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn contacts() -> Vec<Record> {
        vec![
            record(json!({"Id": 1, "company_c": "Acme Corp", "contact_person_c": "Jane Doe",
                          "email_c": "jane@acme.com", "phone_c": "(555) 010-1234"})),
            record(json!({"Id": 2, "company_c": "Globex", "contact_person_c": null,
                          "email_c": "ops@globex.io", "phone_c": "555-0199"})),
            record(json!({"Id": 3, "company_c": "Initech"})),
        ]
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(|r| r["Id"].as_i64().unwrap()).collect()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_blank_search_returns_everything() {
        assert_eq!(ids(&search(&contacts(), "", CONTACT_FIELDS)), vec![1, 2, 3]);
        assert_eq!(ids(&search(&contacts(), "   ", CONTACT_FIELDS)), vec![1, 2, 3]);
    }

    #[test]
    fn test_search_is_case_insensitive_across_fields() {
        assert_eq!(ids(&search(&contacts(), "ACME", CONTACT_FIELDS)), vec![1]);
        assert_eq!(ids(&search(&contacts(), "globex.io", CONTACT_FIELDS)), vec![2]);
        assert_eq!(ids(&search(&contacts(), "jane", CONTACT_FIELDS)), vec![1]);
        assert!(search(&contacts(), "hooli", CONTACT_FIELDS).is_empty());
    }

    #[test]
    fn test_search_phone_substring() {
        assert_eq!(ids(&search(&contacts(), "0199", CONTACT_FIELDS)), vec![2]);
        assert_eq!(ids(&search(&contacts(), "555", CONTACT_FIELDS)), vec![1, 2]);
    }

    #[test]
    fn test_this_week_across_week_boundaries() {
        // Sunday 2024-03-10 and Saturday 2024-03-16 are in the same week.
        for today in [day(2024, 3, 10), day(2024, 3, 13), day(2024, 3, 16)] {
            assert!(DateRange::ThisWeek.contains(today, today));
            assert!(!DateRange::ThisWeek.contains(today + Duration::days(8), today));
        }
        assert!(DateRange::ThisWeek.contains(day(2024, 3, 16), day(2024, 3, 10)));
        assert!(!DateRange::ThisWeek.contains(day(2024, 3, 17), day(2024, 3, 16)));
        assert!(!DateRange::ThisWeek.contains(day(2024, 3, 9), day(2024, 3, 10)));
    }

    #[test]
    fn test_month_and_quarter_windows() {
        let today = day(2024, 5, 20);
        assert!(DateRange::ThisMonth.contains(day(2024, 5, 1), today));
        assert!(!DateRange::ThisMonth.contains(day(2023, 5, 20), today));
        assert!(DateRange::ThisQuarter.contains(day(2024, 4, 1), today));
        assert!(DateRange::ThisQuarter.contains(day(2024, 6, 30), today));
        assert!(!DateRange::ThisQuarter.contains(day(2024, 7, 1), today));
        assert!(!DateRange::ThisQuarter.contains(day(2023, 5, 1), today));
    }

    #[test]
    fn test_date_filter_excludes_missing_and_bad_dates() {
        let deals = vec![
            record(json!({"Id": 1, "expected_close_date_c": "2024-05-02"})),
            record(json!({"Id": 2, "expected_close_date_c": "not a date"})),
            record(json!({"Id": 3})),
            record(json!({"Id": 4, "expected_close_date_c": "2024-08-02T10:00:00Z"})),
        ];
        let out = filter_by_date_range(&deals, "expected_close_date_c", DateRange::ThisMonth, day(2024, 5, 20));
        assert_eq!(ids(&out), vec![1]);
    }

    #[test]
    fn test_value_range_filter() {
        let deals = vec![
            record(json!({"Id": 1, "value_c": 25000})),
            record(json!({"Id": 2, "value_c": 5000})),
            record(json!({"Id": 3})),
        ];
        assert_eq!(ids(&filter_by_value_range(&deals, "value_c", "10000-50000")), vec![1]);
        assert_eq!(ids(&filter_by_value_range(&deals, "value_c", "0-100")), vec![3]);
        assert_eq!(ids(&filter_by_value_range(&deals, "value_c", "x-y")), vec![1, 2, 3]);
    }

    #[test]
    fn test_combined_filter_is_order_independent() {
        let today = day(2024, 5, 20);
        let deals = vec![
            record(json!({"Id": 1, "Name": "Acme renewal", "value_c": 25000, "expected_close_date_c": "2024-05-21"})),
            record(json!({"Id": 2, "Name": "Acme upsell", "value_c": 90000, "expected_close_date_c": "2024-05-21"})),
            record(json!({"Id": 3, "Name": "Globex", "value_c": 20000, "expected_close_date_c": "2024-05-21"})),
            record(json!({"Id": 4, "Name": "Acme pilot", "value_c": 20000, "expected_close_date_c": "2024-07-01"})),
        ];
        let fields = [SearchField::text("Name")];
        let combined = RecordFilter::default()
            .search("acme", &fields)
            .date_range("expected_close_date_c", "this-month")
            .value_range("value_c", "10000-50000")
            .apply(&deals, today);
        assert_eq!(ids(&combined), vec![1]);

        let stepwise = filter_by_value_range(
            &filter_by_date_range(&search(&deals, "acme", &fields), "expected_close_date_c", DateRange::ThisMonth, today),
            "value_c",
            "10000-50000",
        );
        assert_eq!(ids(&stepwise), ids(&combined));
    }

    #[test]
    fn test_sort_records_by_date_and_text() {
        let mut rows = vec![
            record(json!({"Id": 1, "company_c": "beta", "last_contact_date_c": "2024-02-01"})),
            record(json!({"Id": 2, "company_c": "Alpha", "last_contact_date_c": "2023-12-31"})),
            record(json!({"Id": 3, "company_c": null})),
        ];
        sort_records(&mut rows, "company_c", SortDirection::Asc);
        assert_eq!(ids(&rows), vec![2, 1, 3]);
        sort_records(&mut rows, "last_contact_date_c", SortDirection::Desc);
        assert_eq!(ids(&rows), vec![1, 2, 3]);
    }

    #[test]
    fn test_sort_mixes_numbers_and_numeric_strings() {
        let mut rows = vec![
            record(json!({"Id": 1, "value_c": 300})),
            record(json!({"Id": 2, "value_c": "200"})),
            record(json!({"Id": 3, "value_c": 100})),
            record(json!({"Id": 4, "value_c": "1000.5"})),
        ];
        sort_records(&mut rows, "value_c", SortDirection::Asc);
        assert_eq!(ids(&rows), vec![3, 2, 1, 4]);
        sort_records(&mut rows, "value_c", SortDirection::Desc);
        assert_eq!(ids(&rows), vec![4, 1, 2, 3]);
    }

    #[test]
    fn test_compare_values_orders_kinds() {
        let ordered = [
            json!(false),
            json!(2),
            json!("10"),
            json!("2024-01-01"),
            json!("alpha"),
            json!([1]),
            json!({"Id": 1, "Name": "Acme"}),
        ];
        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                assert_eq!(compare_values(a, b), i.cmp(&j), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_record_is_overdue() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let due = |value: Value| record(json!({"Id": 1, "due_date_c": value}));
        assert!(record_is_overdue(&due(json!("2024-03-04T09:00:00Z")), "due_date_c", now));
        // Earlier today is not overdue yet.
        assert!(!record_is_overdue(&due(json!("2024-03-05T08:00:00Z")), "due_date_c", now));
        assert!(!record_is_overdue(&due(json!("2024-03-06")), "due_date_c", now));
        assert!(!record_is_overdue(&due(json!("garbage")), "due_date_c", now));
        assert!(is_overdue("2024-03-04", now));
        assert!(!record_is_overdue(&record(json!({"Id": 2})), "due_date_c", now));
    }
}
