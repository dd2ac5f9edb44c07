//! Filter state -> table query predicates.
//!
//! Screens hold their filters as raw strings keyed by a logical name
//! ("priority", "contact", "dueBucket", "valueRange"). A `FilterSpec` says
//! which storage field a key constrains and how; `build_predicates` turns the
//! current state into the ordered predicate list a fetch sends. A blank value
//! never produces a predicate: absence means "no constraint".

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::store::{Operator, SubOperator, WhereClause};
use crate::types::FilterState;

/// How a filter key constrains its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Exact match on a text value (status, priority, type).
    Equals,
    /// Exact match on an integer reference id.
    ReferenceId,
    /// Named time bucket: `due-today`, `upcoming`, `completed`.
    DateBucket,
    /// Numeric `"min-max"` range.
    ValueRange,
    /// Case-insensitive substring.
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    pub key: &'static str,
    pub field: &'static str,
    pub kind: FilterKind,
}

impl FilterSpec {
    pub const fn new(key: &'static str, field: &'static str, kind: FilterKind) -> Self {
        Self { key, field, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PredicateOp {
    Equals,
    GreaterThan,
    /// Same calendar day as the single value.
    OnDay,
    /// Inclusive `[min, max]`.
    Between,
    Contains,
}

/// A single field constraint: (field, operator, values).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: String,
    pub op: PredicateOp,
    pub values: Vec<Value>,
}

impl Predicate {
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: PredicateOp::Equals,
            values: vec![value.into()],
        }
    }

    /// Wire clauses for this predicate. `Between` has no native operator and
    /// becomes a pair of inclusive bounds.
    pub fn to_where_clauses(&self) -> Vec<WhereClause> {
        let clause = |operator: Operator, sub_operator: Option<SubOperator>, values: Vec<Value>| WhereClause {
            field_name: self.field.clone(),
            operator,
            sub_operator,
            values,
        };
        match self.op {
            PredicateOp::Equals => vec![clause(Operator::EqualTo, None, self.values.clone())],
            PredicateOp::GreaterThan => {
                vec![clause(Operator::GreaterThan, None, self.values.clone())]
            }
            PredicateOp::OnDay => vec![clause(
                Operator::ExactMatch,
                Some(SubOperator::Day),
                self.values.clone(),
            )],
            PredicateOp::Contains => vec![clause(Operator::Contains, None, self.values.clone())],
            PredicateOp::Between => {
                let min = self.values.first().cloned().unwrap_or(Value::Null);
                let max = self.values.get(1).cloned().unwrap_or(Value::Null);
                vec![
                    clause(Operator::GreaterThanOrEqualTo, None, vec![min]),
                    clause(Operator::LessThanOrEqualTo, None, vec![max]),
                ]
            }
        }
    }
}

pub fn to_where_clauses(predicates: &[Predicate]) -> Vec<WhereClause> {
    predicates.iter().flat_map(Predicate::to_where_clauses).collect()
}

/// Inclusive numeric range parsed from `"min-max"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Parse `"10000-50000"`. Both halves must be numbers and `min <= max`;
    /// anything else (`"abc-10"`, `"5"`, `"9-1"`) is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (min, max) = raw.trim().split_once('-')?;
        let min = min.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        let max = max.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        if min > max {
            return None;
        }
        Some(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Task date buckets used by the task board tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueBucket {
    DueToday,
    Upcoming,
    Completed,
}

impl DueBucket {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "due-today" | "today" => Some(DueBucket::DueToday),
            "upcoming" => Some(DueBucket::Upcoming),
            "completed" => Some(DueBucket::Completed),
            _ => None,
        }
    }

    /// Date predicate for `field`, if the bucket has one. `completed` is
    /// selected by status alone.
    pub fn predicate(&self, field: &str, now: DateTime<Utc>) -> Option<Predicate> {
        match self {
            DueBucket::DueToday => Some(Predicate {
                field: field.to_string(),
                op: PredicateOp::OnDay,
                values: vec![json!(format_day_match(now))],
            }),
            DueBucket::Upcoming => Some(Predicate {
                field: field.to_string(),
                op: PredicateOp::GreaterThan,
                values: vec![json!(now.format("%Y-%m-%dT%H:%M:%SZ").to_string())],
            }),
            DueBucket::Completed => None,
        }
    }
}

/// Day value the `ExactMatch`/`Day` operator expects, e.g. `Mar 5, 2024`.
pub fn format_day_match(now: DateTime<Utc>) -> String {
    now.format("%b %-d, %Y").to_string()
}

/// Translate filter state into predicates, in filter-state order.
///
/// Keys without a spec and blank values are skipped. Values that cannot be
/// interpreted (non-numeric reference id, malformed range, unknown bucket)
/// are dropped with a warning rather than failing the fetch.
pub fn build_predicates(
    state: &FilterState,
    specs: &[FilterSpec],
    now: DateTime<Utc>,
) -> Vec<Predicate> {
    let mut predicates = Vec::new();

    for (key, raw) in state {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        let Some(spec) = specs.iter().find(|s| s.key == key) else {
            log::debug!("No filter spec for key '{}', ignoring", key);
            continue;
        };

        match spec.kind {
            FilterKind::Equals => predicates.push(Predicate::equals(spec.field, value)),
            FilterKind::ReferenceId => match value.parse::<i64>() {
                Ok(id) => predicates.push(Predicate::equals(spec.field, id)),
                Err(_) => log::warn!("Ignoring non-numeric {} filter: {:?}", key, value),
            },
            FilterKind::DateBucket => match DueBucket::parse(value) {
                Some(bucket) => predicates.extend(bucket.predicate(spec.field, now)),
                None => log::warn!("Unknown date bucket for {}: {:?}", key, value),
            },
            FilterKind::ValueRange => match ValueRange::parse(value) {
                Some(range) => predicates.push(Predicate {
                    field: spec.field.to_string(),
                    op: PredicateOp::Between,
                    values: vec![json!(range.min), json!(range.max)],
                }),
                None => log::warn!("Ignoring malformed range for {}: {:?}", key, value),
            },
            FilterKind::Contains => predicates.push(Predicate {
                field: spec.field.to_string(),
                op: PredicateOp::Contains,
                values: vec![json!(value)],
            }),
        }
    }

    predicates
}
