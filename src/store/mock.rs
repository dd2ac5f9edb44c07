//! In-memory record store.
//!
//! Evaluates the same query language as the hosted API (projection, `where`,
//! `orderBy`, paging) over tables held in memory. Each instance owns its
//! tables; tests and the `mock` backend construct one with seeded rows.
//! Faults can be queued to exercise the services' failure handling.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{
    BatchResponse, FetchResponse, FieldError, GetResponse, Operator, QueryParams, RecordResult,
    RecordStore, SortType, StoreResponse, SubOperator, WhereClause,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{CrmError, CrmResult};
use crate::filter::{compare_field, compare_values, SortDirection};
use crate::types::{field_date, field_reference, field_text, parse_calendar_date, Record};

/// A queued failure for the next store call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Request-level `success: false` with this message.
    Reject(String),
    /// The call itself fails.
    Transport(String),
}

/// Calls kept for `calls()`; older entries are dropped.
const CALL_HISTORY: usize = 256;

/// One call the store received, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub op: &'static str,
    pub table: String,
    pub params: Option<QueryParams>,
    pub records: Vec<Record>,
    pub ids: Vec<i64>,
}

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: Vec<Record>,
}

impl Table {
    fn position(&self, id: i64) -> Option<usize> {
        self.rows.iter().position(|r| field_reference(r, "Id") == Some(id))
    }
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Table>,
    required: HashMap<String, Vec<(String, String)>>,
    faults: VecDeque<Fault>,
    calls: VecDeque<StoreCall>,
}

pub struct MockStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Seed a table. Rows without an `Id` are numbered after the highest
    /// existing one.
    pub fn with_table(self, table: &str, rows: Vec<Record>) -> Self {
        self.seed(table, rows);
        self
    }

    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        let mut inner = self.inner.lock();
        let entry = inner.tables.entry(table.to_string()).or_default();
        let highest = rows
            .iter()
            .filter_map(|r| field_reference(r, "Id"))
            .chain(entry.rows.iter().filter_map(|r| field_reference(r, "Id")))
            .max()
            .unwrap_or(0);
        entry.next_id = entry.next_id.max(highest + 1);
        for mut row in rows {
            if field_reference(&row, "Id").is_none() {
                row.insert("Id".to_string(), json!(entry.next_id));
                entry.next_id += 1;
            }
            entry.rows.push(row);
        }
    }

    /// Creates on `table` fail per record when `field` is missing or blank.
    pub fn require_field(&self, table: &str, field: &str, label: &str) {
        self.inner
            .lock()
            .required
            .entry(table.to_string())
            .or_default()
            .push((field.to_string(), label.to_string()));
    }

    pub fn push_fault(&self, fault: Fault) {
        self.inner.lock().faults.push_back(fault);
    }

    pub fn fail_next(&self, message: &str) {
        self.push_fault(Fault::Reject(message.to_string()));
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.inner
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// The most recent calls, oldest first.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.iter().cloned().collect()
    }

    fn now_stamp(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Record the call and pop a queued fault, if any.
    fn begin(inner: &mut Inner, call: StoreCall) -> Option<Fault> {
        log::debug!("mock store {} on {}", call.op, call.table);
        if inner.calls.len() == CALL_HISTORY {
            inner.calls.pop_front();
        }
        inner.calls.push_back(call);
        inner.faults.pop_front()
    }
}

fn call(op: &'static str, table: &str) -> StoreCall {
    StoreCall {
        op,
        table: table.to_string(),
        params: None,
        records: Vec::new(),
        ids: Vec::new(),
    }
}

fn fault_response<T>(fault: Fault) -> CrmResult<StoreResponse<T>> {
    match fault {
        Fault::Reject(message) => Ok(StoreResponse::rejected(message)),
        Fault::Transport(message) => Err(CrmError::Transport(message)),
    }
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

/// Day value of an `ExactMatch`/`Day` clause: `Mar 5, 2024` or `2024-03-05`.
fn parse_day_value(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%b %d, %Y")
        .ok()
        .or_else(|| parse_calendar_date(raw))
}

fn values_equal(record: &Record, field: &str, expected: &Value) -> bool {
    let Some(actual) = record.get(field) else {
        return false;
    };
    match expected {
        Value::Number(n) => match (field_reference(record, field), n.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => actual.as_f64().zip(n.as_f64()).is_some_and(|(a, b)| a == b),
        },
        Value::String(s) => field_text(record, field).as_deref() == Some(s.as_str()),
        other => actual == other,
    }
}

/// Order a field against a clause value. Missing and null fields match no
/// comparison.
fn compare_bound(record: &Record, field: &str, bound: &Value) -> Option<Ordering> {
    let actual = record.get(field).filter(|v| !v.is_null())?;
    Some(compare_values(actual, bound))
}

fn clause_matches(record: &Record, clause: &WhereClause) -> bool {
    let field = clause.field_name.as_str();
    clause.values.iter().any(|value| match clause.operator {
        Operator::EqualTo => values_equal(record, field, value),
        Operator::GreaterThan => compare_bound(record, field, value) == Some(Ordering::Greater),
        Operator::GreaterThanOrEqualTo => {
            matches!(compare_bound(record, field, value), Some(Ordering::Greater | Ordering::Equal))
        }
        Operator::LessThan => compare_bound(record, field, value) == Some(Ordering::Less),
        Operator::LessThanOrEqualTo => {
            matches!(compare_bound(record, field, value), Some(Ordering::Less | Ordering::Equal))
        }
        Operator::ExactMatch => match clause.sub_operator {
            Some(SubOperator::Day) => match (field_date(record, field), parse_day_value(value)) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            None => values_equal(record, field, value),
        },
        Operator::Contains => match (field_text(record, field), value.as_str()) {
            (Some(text), Some(needle)) => text.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
    })
}

fn project(record: &Record, params: &QueryParams) -> Record {
    if params.fields.is_empty() {
        return record.clone();
    }
    let mut out = Record::new();
    if let Some(id) = record.get("Id") {
        out.insert("Id".to_string(), id.clone());
    }
    for name in params.field_names() {
        if let Some(value) = record.get(name) {
            out.insert(name.to_string(), value.clone());
        }
    }
    out
}

fn run_query(rows: &[Record], params: &QueryParams) -> Vec<Record> {
    let mut matched: Vec<&Record> = rows
        .iter()
        .filter(|r| params.where_clauses.iter().all(|c| clause_matches(r, c)))
        .collect();

    if !params.order_by.is_empty() {
        matched.sort_by(|a, b| {
            params
                .order_by
                .iter()
                .map(|order| {
                    let direction = match order.sorttype {
                        SortType::Asc => SortDirection::Asc,
                        SortType::Desc => SortDirection::Desc,
                    };
                    compare_field(a, b, &order.field_name, direction)
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    let (offset, limit) = params
        .paging_info
        .map_or((0, usize::MAX), |p| (p.offset, p.limit));
    matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|r| project(r, params))
        .collect()
}

fn missing_required(record: &Record, required: &[(String, String)]) -> Vec<FieldError> {
    required
        .iter()
        .filter(|(field, _)| {
            field_text(record, field).map_or(true, |v| v.trim().is_empty())
        })
        .map(|(_, label)| FieldError {
            field_label: label.clone(),
            message: "is required".to_string(),
        })
        .collect()
}

#[async_trait]
impl RecordStore for MockStore {
    async fn fetch_records(&self, table: &str, params: &QueryParams) -> CrmResult<FetchResponse> {
        let mut inner = self.inner.lock();
        let mut entry = call("fetch", table);
        entry.params = Some(params.clone());
        if let Some(fault) = Self::begin(&mut inner, entry) {
            return fault_response(fault);
        }
        let rows = inner
            .tables
            .get(table)
            .map(|t| run_query(&t.rows, params))
            .unwrap_or_default();
        Ok(StoreResponse::ok(Some(rows)))
    }

    async fn get_record_by_id(
        &self,
        table: &str,
        id: i64,
        params: &QueryParams,
    ) -> CrmResult<GetResponse> {
        let mut inner = self.inner.lock();
        let mut entry = call("get", table);
        entry.params = Some(params.clone());
        entry.ids = vec![id];
        if let Some(fault) = Self::begin(&mut inner, entry) {
            return fault_response(fault);
        }
        let found = inner
            .tables
            .get(table)
            .and_then(|t| t.position(id).map(|i| project(&t.rows[i], params)));
        Ok(StoreResponse::ok(found))
    }

    async fn create_records(&self, table: &str, records: Vec<Record>) -> CrmResult<BatchResponse> {
        let stamp = self.now_stamp();
        let mut inner = self.inner.lock();
        let mut entry = call("create", table);
        entry.records = records.clone();
        if let Some(fault) = Self::begin(&mut inner, entry) {
            return fault_response(fault);
        }

        let required = inner.required.get(table).cloned().unwrap_or_default();
        let target = inner.tables.entry(table.to_string()).or_default();
        target.next_id = target.next_id.max(1);

        let mut results = Vec::with_capacity(records.len());
        for mut record in records {
            let errors = missing_required(&record, &required);
            if !errors.is_empty() {
                results.push(RecordResult::failed(None, errors));
                continue;
            }
            record.insert("Id".to_string(), json!(target.next_id));
            record.insert("CreatedOn".to_string(), json!(stamp));
            record.insert("ModifiedOn".to_string(), json!(stamp));
            target.next_id += 1;
            target.rows.push(record.clone());
            results.push(RecordResult::ok(Some(record)));
        }
        Ok(StoreResponse::batch(results))
    }

    async fn update_records(&self, table: &str, records: Vec<Record>) -> CrmResult<BatchResponse> {
        let stamp = self.now_stamp();
        let mut inner = self.inner.lock();
        let mut entry = call("update", table);
        entry.records = records.clone();
        if let Some(fault) = Self::begin(&mut inner, entry) {
            return fault_response(fault);
        }

        let target = inner.tables.entry(table.to_string()).or_default();
        let results = records
            .into_iter()
            .map(|patch| {
                let Some(id) = field_reference(&patch, "Id") else {
                    return RecordResult::failed(Some("Id is required".to_string()), Vec::new());
                };
                let Some(index) = target.position(id) else {
                    return RecordResult::failed(None, Vec::new());
                };
                let row = &mut target.rows[index];
                for (key, value) in patch {
                    if key != "Id" {
                        row.insert(key, value);
                    }
                }
                row.insert("ModifiedOn".to_string(), json!(stamp));
                RecordResult::ok(Some(row.clone()))
            })
            .collect();
        Ok(StoreResponse::batch(results))
    }

    async fn delete_records(&self, table: &str, ids: &[i64]) -> CrmResult<BatchResponse> {
        let mut inner = self.inner.lock();
        let mut entry = call("delete", table);
        entry.ids = ids.to_vec();
        if let Some(fault) = Self::begin(&mut inner, entry) {
            return fault_response(fault);
        }

        let target = inner.tables.entry(table.to_string()).or_default();
        let results = ids
            .iter()
            .map(|id| match target.position(*id) {
                Some(index) => {
                    target.rows.remove(index);
                    RecordResult::ok(None)
                }
                None => RecordResult::failed(None, Vec::new()),
            })
            .collect();
        Ok(StoreResponse::batch(results))
    }
}
