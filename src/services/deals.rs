// Deal service
// Deal CRUD and pipeline views.

use serde_json::json;

use super::{map_fields, parse_id, FieldKind, FieldMapping, ServiceContext};
use crate::aggregate::{pipeline_summary, GroupStats};
use crate::entity::{Deal, DealStage, StoredEntity};
use crate::error::{CrmError, CrmResult};
use crate::filter::{RecordFilter, SearchField};
use crate::query::{build_predicates, to_where_clauses, FilterKind, FilterSpec};
use crate::store::{QueryParams, SortType};
use crate::types::{field_number, field_text, FilterState, Record};

const ENTITY: &str = "deal";

const MAPPINGS: &[FieldMapping] = &[
    FieldMapping::new("Name", &["name", "Name"], FieldKind::Text),
    FieldMapping::new("value_c", &["value", "value_c"], FieldKind::Number),
    FieldMapping::new(
        "expected_close_date_c",
        &["expectedCloseDate", "expected_close_date_c"],
        FieldKind::Date,
    ),
    FieldMapping::new("stage_c", &["stage", "stage_c"], FieldKind::Text),
    FieldMapping::new(
        "probability_percentage_c",
        &["probability", "probabilityPercentage", "probability_percentage_c"],
        FieldKind::Percentage,
    ),
    FieldMapping::new("company_c", &["companyId", "company", "company_c"], FieldKind::Reference),
    FieldMapping::new("contact_c", &["contactId", "contact", "contact_c"], FieldKind::Reference),
    FieldMapping::new("description_c", &["description", "description_c"], FieldKind::Text),
    FieldMapping::new("next_follow_up_c", &["nextFollowUp", "next_follow_up_c"], FieldKind::Timestamp),
    FieldMapping::new("completed_date_c", &["completedDate", "completed_date_c"], FieldKind::Date),
    FieldMapping::new("completed_by_c", &["completedBy", "completed_by_c"], FieldKind::Text),
    FieldMapping::new(
        "rescheduled_from_c",
        &["rescheduledFrom", "rescheduled_from_c"],
        FieldKind::Timestamp,
    ),
];

const FILTERS: &[FilterSpec] = &[
    FilterSpec::new("stage", "stage_c", FilterKind::Equals),
    FilterSpec::new("company", "company_c", FilterKind::ReferenceId),
    FilterSpec::new("contact", "contact_c", FilterKind::ReferenceId),
    FilterSpec::new("valueRange", "value_c", FilterKind::ValueRange),
];

pub const SEARCH_FIELDS: &[SearchField] = &[SearchField::text("Name"), SearchField::text("company_c")];

/// Stage must be one of the pipeline stages; value must not be negative.
fn check_deal(record: &Record) -> CrmResult<()> {
    if let Some(stage) = field_text(record, "stage_c") {
        if DealStage::parse(&stage).is_none() {
            return Err(CrmError::Validation(format!("Unknown deal stage: {stage}")));
        }
    }
    if field_number(record, "value_c").is_some_and(|v| v < 0.0) {
        return Err(CrmError::Validation("Deal value cannot be negative".to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct DealService {
    ctx: ServiceContext,
}

impl DealService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn params() -> QueryParams {
        QueryParams::with_fields(Deal::FIELDS).order_by("Id", SortType::Desc)
    }

    async fn fetch_rows(&self, filters: &FilterState) -> CrmResult<Vec<Record>> {
        let predicates = build_predicates(filters, FILTERS, self.ctx.clock.now());
        let params = Self::params().filter(to_where_clauses(&predicates));
        self.ctx.fetch(ENTITY, Deal::TABLE, &params).await
    }

    pub async fn get_all(&self, filters: &FilterState) -> CrmResult<Vec<Deal>> {
        self.fetch_rows(filters)
            .await?
            .into_iter()
            .map(Deal::from_record)
            .collect()
    }

    /// Fetch every deal and apply a client-side filter (search, close-date
    /// window, value range) as of today.
    pub async fn get_filtered(&self, filter: &RecordFilter) -> CrmResult<Vec<Deal>> {
        let rows = self.fetch_rows(&FilterState::new()).await?;
        filter
            .apply(&rows, self.ctx.clock.today())
            .into_iter()
            .map(Deal::from_record)
            .collect()
    }

    /// Count and value per stage, every stage present, in pipeline order.
    pub async fn pipeline(&self) -> CrmResult<GroupStats> {
        let rows = self.fetch_rows(&FilterState::new()).await?;
        Ok(pipeline_summary(&rows))
    }

    pub async fn get_by_id(&self, id: &str) -> CrmResult<Deal> {
        let id = parse_id(id)?;
        let record = self
            .ctx
            .get(ENTITY, Deal::TABLE, id, &QueryParams::with_fields(Deal::FIELDS))
            .await?;
        Deal::from_record(record)
    }

    pub async fn create(&self, input: &Record) -> CrmResult<Deal> {
        let mut record = map_fields(input, MAPPINGS)?;
        check_deal(&record)?;

        record
            .entry("stage_c")
            .or_insert_with(|| json!(DealStage::Lead.as_str()));
        record.entry("value_c").or_insert_with(|| json!(0.0));
        record.entry("probability_percentage_c").or_insert_with(|| json!(0));
        record.insert("last_activity_date_c".to_string(), json!(self.ctx.today()));

        let created = self.ctx.create_one(ENTITY, Deal::TABLE, record).await?;
        log::info!("Created deal {:?}", created.get("Id"));
        Deal::from_record(created)
    }

    pub async fn update(&self, id: &str, input: &Record) -> CrmResult<Deal> {
        let id = parse_id(id)?;
        let patch = map_fields(input, MAPPINGS)?;
        check_deal(&patch)?;
        let updated = self.ctx.update_one(ENTITY, Deal::TABLE, id, patch).await?;
        Deal::from_record(updated)
    }

    /// Move a deal to another pipeline stage.
    pub async fn update_stage(&self, id: &str, stage: DealStage) -> CrmResult<Deal> {
        let mut input = Record::new();
        input.insert("stage_c".to_string(), json!(stage.as_str()));
        self.update(id, &input).await
    }

    pub async fn delete(&self, id: &str) -> CrmResult<bool> {
        let id = parse_id(id)?;
        self.ctx.delete_one(ENTITY, Deal::TABLE, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{context, record};
    use crate::store::mock::MockStore;

    fn seeded() -> MockStore {
        MockStore::new().with_table(
            Deal::TABLE,
            vec![
                record(json!({"Id": 1, "Name": "Acme renewal", "stage_c": "Lead", "value_c": 25000,
                              "expected_close_date_c": "2024-03-20", "company_c": {"Id": 7, "Name": "Acme"}})),
                record(json!({"Id": 2, "Name": "Globex pilot", "stage_c": "Lead", "value_c": 5000,
                              "expected_close_date_c": "2024-06-02", "company_c": 8})),
                record(json!({"Id": 3, "Name": "Acme upsell", "stage_c": "Negotiation", "value_c": 40000,
                              "expected_close_date_c": "2024-03-07", "company_c": 7})),
            ],
        )
    }

    fn ids(deals: &[Deal]) -> Vec<i64> {
        deals.iter().map(|d| d.id).collect()
    }

    #[tokio::test]
    async fn test_create_defaults_and_coercion() {
        let (ctx, store) = context(MockStore::new());
        let service = DealService::new(ctx);
        let deal = service
            .create(&record(json!({
                "name": "Big one",
                "value": "12000.50",
                "probability": 130,
                "companyId": "7",
                "expectedCloseDate": "2024-04-01T15:30:00Z"
            })))
            .await
            .unwrap();
        assert_eq!(deal.stage, DealStage::Lead);
        assert_eq!(deal.probability, 100);
        assert_eq!(deal.value, 12000.5);
        assert_eq!(deal.company.map(|c| c.id), Some(7));

        let sent = &store.calls()[0].records[0];
        assert_eq!(sent["expected_close_date_c"], json!("2024-04-01"));
        assert_eq!(sent["last_activity_date_c"], json!("2024-03-05"));
        assert_eq!(sent["company_c"], json!(7));
    }

    #[tokio::test]
    async fn test_negative_value_and_unknown_stage_are_validation_errors() {
        let (ctx, store) = context(MockStore::new());
        let service = DealService::new(ctx);
        let err = service.create(&record(json!({"name": "x", "value": -5}))).await.unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
        let err = service.create(&record(json!({"name": "x", "stage": "Won"}))).await.unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_value_range_and_company_filters() {
        let (ctx, store) = context(seeded());
        let service = DealService::new(ctx);
        let filters = vec![
            ("company".to_string(), "7".to_string()),
            ("valueRange".to_string(), "10000-30000".to_string()),
        ];
        assert_eq!(ids(&service.get_all(&filters).await.unwrap()), vec![1]);

        let sent = store.calls()[0].params.clone().unwrap();
        assert_eq!(sent.where_clauses.len(), 3);

        let malformed = vec![("valueRange".to_string(), "abc-10".to_string())];
        assert_eq!(ids(&service.get_all(&malformed).await.unwrap()), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_client_side_filter_and_pipeline() {
        let (ctx, _) = context(seeded());
        let service = DealService::new(ctx);

        let filter = RecordFilter::default()
            .search("acme", SEARCH_FIELDS)
            .date_range("expected_close_date_c", "this-month");
        assert_eq!(ids(&service.get_filtered(&filter).await.unwrap()), vec![3, 1]);

        let pipeline = service.pipeline().await.unwrap();
        assert_eq!(pipeline.groups.len(), DealStage::ALL.len());
        assert_eq!(pipeline.get("Lead").unwrap().count, 2);
        assert_eq!(pipeline.get("Lead").unwrap().total, 30000.0);
        assert_eq!(pipeline.get("Closed Won").unwrap().count, 0);
        assert_eq!(pipeline.total_value(), 70000.0);
    }

    #[tokio::test]
    async fn test_row_with_null_stage_does_not_fail_the_list() {
        let store = seeded();
        store.seed(Deal::TABLE, vec![record(json!({"Id": 4, "Name": "Imported", "stage_c": null}))]);
        let (ctx, _) = context(store);
        let service = DealService::new(ctx);

        let deals = service.get_all(&FilterState::new()).await.unwrap();
        assert_eq!(ids(&deals), vec![4, 3, 2, 1]);
        assert_eq!(deals[0].stage, DealStage::Lead);
        assert_eq!(deals[0].value, 0.0);
    }

    #[tokio::test]
    async fn test_update_stage() {
        let (ctx, _) = context(seeded());
        let service = DealService::new(ctx);
        let deal = service.update_stage("2", DealStage::Qualified).await.unwrap();
        assert_eq!(deal.stage, DealStage::Qualified);
        assert_eq!(deal.name.as_deref(), Some("Globex pilot"));
    }

    #[tokio::test]
    async fn test_create_partial_failure_is_remote_failure() {
        let store = MockStore::new();
        store.require_field(Deal::TABLE, "Name", "Deal Name");
        let (ctx, _) = context(store);
        let service = DealService::new(ctx);
        let err = service.create(&record(json!({"value": 10}))).await.unwrap_err();
        match err {
            CrmError::RemoteFailure { message, succeeded } => {
                assert_eq!(message, "Deal Name: is required");
                assert_eq!(succeeded, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
