//! Entity services: the CRUD contract the view layer calls.
//!
//! Each service translates UI-facing input into storage-named records,
//! issues one store call per operation, and normalizes the store's reply
//! into `CrmResult`. The store reports rejections inside an `Ok` envelope;
//! the helpers here turn those into `CrmError::RemoteFailure` or
//! `CrmError::NotFound` and log them with the entity and operation.

pub mod contacts;
pub mod dashboard;
pub mod deals;
pub mod tasks;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Value};

use crate::clock::Clock;
use crate::entity::clamp_probability;
use crate::error::{CrmError, CrmResult};
use crate::store::{BatchResponse, FetchResponse, QueryParams, RecordResult, RecordStore};
use crate::types::{parse_calendar_date, parse_instant, Record};

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

/// How an input value is coerced before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// `YYYY-MM-DD`
    Date,
    /// ISO-8601, whole seconds.
    Timestamp,
    /// Integer id of another record.
    Reference,
    Number,
    /// Integer clamped to 0..=100.
    Percentage,
}

/// One storage field and the input keys accepted for it. The first key that
/// is present and non-null wins, so UI-facing names go first.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub storage: &'static str,
    pub synonyms: &'static [&'static str],
    pub kind: FieldKind,
}

impl FieldMapping {
    pub const fn new(storage: &'static str, synonyms: &'static [&'static str], kind: FieldKind) -> Self {
        Self { storage, synonyms, kind }
    }

    pub fn resolve<'a>(&self, input: &'a Record) -> Option<&'a Value> {
        self.synonyms
            .iter()
            .filter_map(|key| input.get(*key))
            .find(|value| !value.is_null())
    }

    fn coerce(&self, value: &Value) -> CrmResult<Value> {
        match self.kind {
            FieldKind::Text => Ok(value.clone()),
            FieldKind::Date => Ok(match value.as_str() {
                Some(raw) => json!(format_date_only(raw)),
                None => value.clone(),
            }),
            FieldKind::Timestamp => Ok(match value.as_str() {
                Some(raw) => json!(format_timestamp(raw)),
                None => value.clone(),
            }),
            FieldKind::Reference => reference_id(value)
                .map(|id| json!(id))
                .ok_or_else(|| invalid(self.storage, value)),
            FieldKind::Number => number(value)
                .map(|n| json!(n))
                .ok_or_else(|| invalid(self.storage, value)),
            FieldKind::Percentage => number(value)
                .map(|n| json!(clamp_probability(n.round() as i64)))
                .ok_or_else(|| invalid(self.storage, value)),
        }
    }
}

fn invalid(field: &str, value: &Value) -> CrmError {
    CrmError::Validation(format!("Invalid value for {field}: {value}"))
}

fn reference_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get("Id").and_then(Value::as_i64),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Storage record holding every mapped field present in `input`, coerced.
/// Fields absent from `input` are absent from the result.
pub fn map_fields(input: &Record, mappings: &[FieldMapping]) -> CrmResult<Record> {
    let mut out = Record::new();
    for mapping in mappings {
        if let Some(value) = mapping.resolve(input) {
            out.insert(mapping.storage.to_string(), mapping.coerce(value)?);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Dates and ids
// ---------------------------------------------------------------------------

/// `YYYY-MM-DD` for anything that parses as a date; other input unchanged.
/// Offset timestamps keep the calendar day they were written in.
pub fn format_date_only(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw.trim()) {
        return dt.date_naive().format("%Y-%m-%d").to_string();
    }
    match parse_calendar_date(raw) {
        Some(day) => day.format("%Y-%m-%d").to_string(),
        None => raw.to_string(),
    }
}

/// UTC ISO-8601 truncated to whole seconds; other input unchanged.
pub fn format_timestamp(raw: &str) -> String {
    match parse_instant(raw) {
        Some(instant) => instant.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => raw.to_string(),
    }
}

pub fn parse_id(raw: &str) -> CrmResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| CrmError::Validation(format!("Invalid record id: {raw:?}")))
}

// ---------------------------------------------------------------------------
// Response normalization
// ---------------------------------------------------------------------------

/// Most specific message a failed result carries.
fn failure_message(result: &RecordResult) -> Option<String> {
    result
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| {
            result
                .errors
                .first()
                .map(|e| format!("{}: {}", e.field_label, e.message))
        })
}

fn rejected(message: Option<String>) -> CrmError {
    CrmError::remote(message.unwrap_or_else(|| "Request failed".to_string()))
}

pub(crate) fn check_fetch(resp: FetchResponse) -> CrmResult<Vec<Record>> {
    if !resp.success {
        return Err(rejected(resp.message));
    }
    Ok(resp.data.unwrap_or_default())
}

fn batch_results(resp: BatchResponse) -> CrmResult<Vec<RecordResult>> {
    if !resp.success {
        return Err(rejected(resp.message));
    }
    Ok(resp.results.unwrap_or_default())
}

/// Created records, or the first failure. A batch with any failed record is
/// reported as failed; `succeeded` says how many were stored anyway.
pub(crate) fn collect_batch(resp: BatchResponse) -> CrmResult<Vec<Record>> {
    let results = batch_results(resp)?;
    let succeeded = results.iter().filter(|r| r.success).count();
    if let Some(failed) = results.iter().find(|r| !r.success) {
        return Err(CrmError::RemoteFailure {
            message: failure_message(failed).unwrap_or_else(|| "Record was rejected".to_string()),
            succeeded,
        });
    }
    Ok(results.into_iter().filter_map(|r| r.data).collect())
}

/// A failed result with neither message nor field errors means no record
/// matched the id.
fn is_no_match(result: &RecordResult) -> bool {
    !result.success && failure_message(result).is_none()
}

pub(crate) fn updated_record(resp: BatchResponse, table: &str, id: i64) -> CrmResult<Record> {
    let result = batch_results(resp)?
        .into_iter()
        .next()
        .ok_or_else(|| CrmError::NotFound { table: table.to_string(), id })?;
    if is_no_match(&result) {
        return Err(CrmError::NotFound { table: table.to_string(), id });
    }
    if !result.success {
        return Err(rejected(failure_message(&result)));
    }
    result
        .data
        .ok_or_else(|| CrmError::Transport(format!("Update of {table} {id} returned no record")))
}

/// `Ok(false)` when nothing matched; `Err` when the store refused.
pub(crate) fn delete_outcome(resp: BatchResponse) -> CrmResult<bool> {
    let results = batch_results(resp)?;
    let Some(result) = results.first() else {
        return Ok(false);
    };
    if result.success {
        return Ok(true);
    }
    if is_no_match(result) {
        return Ok(false);
    }
    Err(rejected(failure_message(result)))
}

// ---------------------------------------------------------------------------
// Shared store access
// ---------------------------------------------------------------------------

/// Store and clock shared by the entity services.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn RecordStore>,
    pub clock: Arc<dyn Clock>,
}

fn log_failure(entity: &str, op: &str, err: &CrmError) {
    match err {
        CrmError::Validation(_) | CrmError::NotFound { .. } => {
            log::debug!("{} {} rejected: {}", entity, op, err)
        }
        _ => log::error!("Error during {} {}: {}", entity, op, err),
    }
}

fn logged<T>(result: CrmResult<T>, entity: &str, op: &str) -> CrmResult<T> {
    if let Err(err) = &result {
        log_failure(entity, op, err);
    }
    result
}

impl ServiceContext {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn now_timestamp(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn today(&self) -> String {
        self.clock.today().format("%Y-%m-%d").to_string()
    }

    pub(crate) async fn fetch(&self, entity: &str, table: &str, params: &QueryParams) -> CrmResult<Vec<Record>> {
        log::debug!("Fetching {} ({} where clauses)", entity, params.where_clauses.len());
        let result = match self.store.fetch_records(table, params).await {
            Ok(resp) => check_fetch(resp),
            Err(e) => Err(e),
        };
        logged(result, entity, "fetch")
    }

    pub(crate) async fn get(&self, entity: &str, table: &str, id: i64, params: &QueryParams) -> CrmResult<Record> {
        log::debug!("Fetching {} {}", entity, id);
        let result = match self.store.get_record_by_id(table, id, params).await {
            Ok(resp) if !resp.success => Err(rejected(resp.message)),
            Ok(resp) => resp.data.ok_or_else(|| CrmError::NotFound {
                table: table.to_string(),
                id,
            }),
            Err(e) => Err(e),
        };
        logged(result, entity, "lookup")
    }

    pub(crate) async fn create_one(&self, entity: &str, table: &str, record: Record) -> CrmResult<Record> {
        log::debug!("Creating {} with {} fields", entity, record.len());
        let result = match self.store.create_records(table, vec![record]).await {
            Ok(resp) => collect_batch(resp).and_then(|mut created| {
                if created.is_empty() {
                    Err(CrmError::Transport(format!("Create on {table} returned no record")))
                } else {
                    Ok(created.remove(0))
                }
            }),
            Err(e) => Err(e),
        };
        logged(result, entity, "create")
    }

    pub(crate) async fn update_one(
        &self,
        entity: &str,
        table: &str,
        id: i64,
        mut patch: Record,
    ) -> CrmResult<Record> {
        log::debug!("Updating {} {} ({} fields)", entity, id, patch.len());
        patch.insert("Id".to_string(), json!(id));
        let result = match self.store.update_records(table, vec![patch]).await {
            Ok(resp) => updated_record(resp, table, id),
            Err(e) => Err(e),
        };
        logged(result, entity, "update")
    }

    pub(crate) async fn delete_one(&self, entity: &str, table: &str, id: i64) -> CrmResult<bool> {
        log::debug!("Deleting {} {}", entity, id);
        let result = match self.store.delete_records(table, &[id]).await {
            Ok(resp) => delete_outcome(resp),
            Err(e) => Err(e),
        };
        if let Ok(false) = result {
            log::warn!("Delete of {} {} matched no record", entity, id);
        }
        logged(result, entity, "delete")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use super::ServiceContext;
    use crate::clock::FixedClock;
    use crate::store::mock::MockStore;
    use crate::types::Record;

    /// 2024-03-05 14:07:09 UTC, a Tuesday.
    pub fn clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap())
    }

    pub fn context(store: MockStore) -> (ServiceContext, Arc<MockStore>) {
        let store = Arc::new(store);
        let ctx = ServiceContext::new(store.clone(), Arc::new(clock()));
        (ctx, store)
    }

    pub fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldError, StoreResponse};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    const COMPANY: &[FieldMapping] = &[
        FieldMapping::new("Name", &["company", "company_c"], FieldKind::Text),
        FieldMapping::new("company_c", &["company", "company_c"], FieldKind::Text),
        FieldMapping::new("deal_c", &["dealId", "deal_c"], FieldKind::Reference),
    ];

    #[test]
    fn test_ui_name_takes_precedence() {
        let mapped = map_fields(&record(json!({"company_c": "Old", "company": "New"})), COMPANY).unwrap();
        assert_eq!(mapped["company_c"], json!("New"));
        assert_eq!(mapped["Name"], json!("New"));
    }

    #[test]
    fn test_null_synonym_falls_through() {
        let mapped = map_fields(&record(json!({"company": null, "company_c": "Acme"})), COMPANY).unwrap();
        assert_eq!(mapped["company_c"], json!("Acme"));
        assert!(!mapped.contains_key("deal_c"));
    }

    #[test]
    fn test_reference_coercion() {
        let mapped = map_fields(&record(json!({"dealId": "42"})), COMPANY).unwrap();
        assert_eq!(mapped["deal_c"], json!(42));
        let err = map_fields(&record(json!({"dealId": "forty"})), COMPANY).unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
    }

    #[test]
    fn test_date_formatting() {
        assert_eq!(format_date_only("2024-03-05T22:15:00-05:00"), "2024-03-05");
        assert_eq!(format_date_only("2024-03-05T10:30"), "2024-03-05");
        assert_eq!(format_date_only("next week"), "next week");
        assert_eq!(format_timestamp("2024-03-05T10:30:45.123Z"), "2024-03-05T10:30:45Z");
        assert_eq!(format_timestamp("2024-03-05T10:30"), "2024-03-05T10:30:00Z");
        assert_eq!(format_timestamp("soon"), "soon");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(" 17 ").unwrap(), 17);
        assert!(matches!(parse_id("abc"), Err(CrmError::Validation(_))));
    }

    #[test]
    fn test_partial_batch_failure_reports_first_error() {
        let resp = StoreResponse::batch(vec![
            RecordResult::ok(Some(record(json!({"Id": 1})))),
            RecordResult::failed(
                None,
                vec![FieldError { field_label: "Email".into(), message: "is required".into() }],
            ),
        ]);
        match collect_batch(resp) {
            Err(CrmError::RemoteFailure { message, succeeded }) => {
                assert_eq!(message, "Email: is required");
                assert_eq!(succeeded, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_delete_outcomes() {
        let matched = StoreResponse::batch(vec![RecordResult::ok(None)]);
        assert!(delete_outcome(matched).unwrap());

        let missing = StoreResponse::batch(vec![RecordResult::failed(None, Vec::new())]);
        assert!(!delete_outcome(missing).unwrap());

        let refused = StoreResponse::batch(vec![RecordResult::failed(Some("Record is locked".into()), Vec::new())]);
        assert!(matches!(delete_outcome(refused), Err(CrmError::RemoteFailure { .. })));

        let request_failed: BatchResponse = StoreResponse::rejected("Invalid table");
        assert!(delete_outcome(request_failed).is_err());
    }
}
