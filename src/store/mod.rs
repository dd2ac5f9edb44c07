//! Record store seam.
//!
//! Every entity service talks to a `RecordStore`: CRUD over named tables plus
//! a small query language (field projection, `where` predicates, `orderBy`,
//! paging). Two implementations share the contract:
//! - remote: the hosted table API over HTTP
//! - mock: an in-memory store that evaluates the same query language
//!
//! The wire types here mirror the table API's JSON exactly; field names are
//! PascalCase/camelCase as the service expects them.

pub mod mock;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CrmResult;
use crate::types::Record;

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub field: FieldName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldName {
    #[serde(rename = "Name")]
    pub name: String,
}

/// Comparison operators understood by the table API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    EqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    ExactMatch,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubOperator {
    Day,
}

/// One `where` clause. Multiple values are alternatives (OR); multiple
/// clauses are conjunctive (AND).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    #[serde(rename = "FieldName")]
    pub field_name: String,
    #[serde(rename = "Operator")]
    pub operator: Operator,
    #[serde(rename = "SubOperator", default, skip_serializing_if = "Option::is_none")]
    pub sub_operator: Option<SubOperator>,
    #[serde(rename = "Values")]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortType {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    #[serde(rename = "fieldName")]
    pub field_name: String,
    pub sorttype: SortType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingInfo {
    pub limit: usize,
    pub offset: usize,
}

/// Parameters for `fetch_records` / `get_record_by_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSelector>,
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub where_clauses: Vec<WhereClause>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(rename = "pagingInfo", default, skip_serializing_if = "Option::is_none")]
    pub paging_info: Option<PagingInfo>,
}

impl QueryParams {
    /// Project the given storage fields.
    pub fn with_fields(fields: &[&str]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|name| FieldSelector {
                    field: FieldName {
                        name: (*name).to_string(),
                    },
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, clauses: impl IntoIterator<Item = WhereClause>) -> Self {
        self.where_clauses.extend(clauses);
        self
    }

    pub fn order_by(mut self, field: &str, sorttype: SortType) -> Self {
        self.order_by.push(OrderBy {
            field_name: field.to_string(),
            sorttype,
        });
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.paging_info = Some(PagingInfo { limit, offset });
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.field.name.as_str())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Per-field validation error inside a batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field_label: String,
    pub message: String,
}

/// Outcome of one record within a create/update/delete batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Record>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

impl RecordResult {
    pub fn ok(data: Option<Record>) -> Self {
        Self {
            success: true,
            data,
            message: None,
            errors: Vec::new(),
        }
    }

    pub fn failed(message: Option<String>, errors: Vec<FieldError>) -> Self {
        Self {
            success: false,
            data: None,
            message,
            errors,
        }
    }
}

/// Envelope every store call answers with. `data` is a record list for
/// fetches and a single record for by-id lookups; batch operations fill
/// `results` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub results: Option<Vec<RecordResult>>,
}

impl<T> StoreResponse<T> {
    pub fn ok(data: Option<T>) -> Self {
        Self {
            success: true,
            message: None,
            data,
            results: None,
        }
    }

    pub fn batch(results: Vec<RecordResult>) -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            results: Some(results),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            results: None,
        }
    }
}

pub type FetchResponse = StoreResponse<Vec<Record>>;
pub type GetResponse = StoreResponse<Record>;
pub type BatchResponse = StoreResponse<Value>;

// ============================================================================
// Store trait
// ============================================================================

/// Abstract table store.
///
/// An `Err` means the call itself failed (transport, malformed payload).
/// Rejections the store reports come back as `Ok` with `success: false` or
/// failed entries in `results`; interpreting them is the caller's job.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_records(&self, table: &str, params: &QueryParams) -> CrmResult<FetchResponse>;

    async fn get_record_by_id(
        &self,
        table: &str,
        id: i64,
        params: &QueryParams,
    ) -> CrmResult<GetResponse>;

    async fn create_records(&self, table: &str, records: Vec<Record>) -> CrmResult<BatchResponse>;

    /// Each record must carry its `Id`; only the fields present are changed.
    async fn update_records(&self, table: &str, records: Vec<Record>) -> CrmResult<BatchResponse>;

    async fn delete_records(&self, table: &str, ids: &[i64]) -> CrmResult<BatchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_params_wire_shape() {
        let params = QueryParams::with_fields(&["Name", "status_c"])
            .filter([WhereClause {
                field_name: "due_date_c".into(),
                operator: Operator::ExactMatch,
                sub_operator: Some(SubOperator::Day),
                values: vec![json!("Mar 5, 2024")],
            }])
            .order_by("due_date_c", SortType::Asc)
            .page(10, 0);

        let wire = serde_json::to_value(&params).unwrap();
        assert_eq!(
            wire,
            json!({
                "fields": [{"field": {"Name": "Name"}}, {"field": {"Name": "status_c"}}],
                "where": [{
                    "FieldName": "due_date_c",
                    "Operator": "ExactMatch",
                    "SubOperator": "Day",
                    "Values": ["Mar 5, 2024"]
                }],
                "orderBy": [{"fieldName": "due_date_c", "sorttype": "ASC"}],
                "pagingInfo": {"limit": 10, "offset": 0}
            })
        );
    }

    #[test]
    fn test_batch_response_parses_field_errors() {
        let raw = json!({
            "success": true,
            "results": [
                {"success": true, "data": {"Id": 4, "Name": "Acme"}},
                {"success": false, "errors": [{"fieldLabel": "Email", "message": "is required"}]}
            ]
        });
        let parsed: BatchResponse = serde_json::from_value(raw).unwrap();
        let results = parsed.results.unwrap();
        assert!(results[0].success);
        assert_eq!(results[1].errors[0].field_label, "Email");
        assert_eq!(results[1].message, None);
    }
}
