// Task service
// Task CRUD and the due-today / upcoming / completed boards.

use serde_json::json;

use super::{map_fields, parse_id, FieldKind, FieldMapping, ServiceContext};
use crate::aggregate::{task_stats, TaskStats};
use crate::entity::{Priority, StoredEntity, Task, TaskStatus, TASK_TYPES};
use crate::error::{CrmError, CrmResult};
use crate::query::{build_predicates, to_where_clauses, DueBucket, FilterKind, FilterSpec, Predicate};
use crate::store::{QueryParams, SortType};
use crate::types::{field_text, FilterState, Record};

const ENTITY: &str = "task";

const MAPPINGS: &[FieldMapping] = &[
    FieldMapping::new("Name", &["name", "title", "Name"], FieldKind::Text),
    FieldMapping::new("description_c", &["description", "description_c"], FieldKind::Text),
    FieldMapping::new("priority_c", &["priority", "priority_c"], FieldKind::Text),
    FieldMapping::new("due_date_c", &["dueDate", "due_date_c"], FieldKind::Timestamp),
    FieldMapping::new("contact_c", &["contactId", "contact", "contact_c"], FieldKind::Reference),
    FieldMapping::new("deal_c", &["dealId", "deal", "deal_c"], FieldKind::Reference),
    FieldMapping::new("type_c", &["type", "taskType", "type_c"], FieldKind::Text),
    FieldMapping::new("status_c", &["status", "status_c"], FieldKind::Text),
    FieldMapping::new("notes_c", &["notes", "notes_c"], FieldKind::Text),
];

const FILTERS: &[FilterSpec] = &[
    FilterSpec::new("status", "status_c", FilterKind::Equals),
    FilterSpec::new("priority", "priority_c", FilterKind::Equals),
    FilterSpec::new("contact", "contact_c", FilterKind::ReferenceId),
    FilterSpec::new("deal", "deal_c", FilterKind::ReferenceId),
    FilterSpec::new("type", "type_c", FilterKind::Equals),
    FilterSpec::new("dueBucket", "due_date_c", FilterKind::DateBucket),
];

/// Filters the bucket boards accept on top of their fixed predicates.
const BOARD_FILTERS: &[FilterSpec] = &[
    FilterSpec::new("contact", "contact_c", FilterKind::ReferenceId),
    FilterSpec::new("deal", "deal_c", FilterKind::ReferenceId),
    FilterSpec::new("priority", "priority_c", FilterKind::Equals),
    FilterSpec::new("type", "type_c", FilterKind::Equals),
];

/// Status every task in a bucket carries.
fn bucket_status(bucket: DueBucket) -> TaskStatus {
    match bucket {
        DueBucket::Completed => TaskStatus::Completed,
        DueBucket::DueToday | DueBucket::Upcoming => TaskStatus::Open,
    }
}

fn check_task(record: &Record) -> CrmResult<()> {
    if let Some(priority) = field_text(record, "priority_c") {
        if Priority::parse(&priority).is_none() {
            return Err(CrmError::Validation(format!("Unknown priority: {priority}")));
        }
    }
    if let Some(task_type) = field_text(record, "type_c") {
        if !TASK_TYPES.contains(&task_type.as_str()) {
            return Err(CrmError::Validation(format!("Unknown task type: {task_type}")));
        }
    }
    if let Some(status) = field_text(record, "status_c") {
        if status != TaskStatus::Open.as_str() && status != TaskStatus::Completed.as_str() {
            return Err(CrmError::Validation(format!("Unknown task status: {status}")));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct TaskService {
    ctx: ServiceContext,
}

impl TaskService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn fetch_tasks(&self, predicates: &[Predicate], order_field: &str, order: SortType) -> CrmResult<Vec<Task>> {
        let params = QueryParams::with_fields(Task::FIELDS)
            .filter(to_where_clauses(predicates))
            .order_by(order_field, order);
        self.ctx
            .fetch(ENTITY, Task::TABLE, &params)
            .await?
            .into_iter()
            .map(Task::from_record)
            .collect()
    }

    /// All tasks matching `filters`. A `dueBucket` filter also selects the
    /// bucket's status, so `completed` returns completed tasks only.
    pub async fn get_all(&self, filters: &FilterState) -> CrmResult<Vec<Task>> {
        let bucket = filters
            .iter()
            .find(|(key, _)| key == "dueBucket")
            .and_then(|(_, value)| DueBucket::parse(value));
        let mut predicates: Vec<Predicate> = bucket
            .map(|b| Predicate::equals("status_c", bucket_status(b).as_str()))
            .into_iter()
            .collect();
        predicates.extend(build_predicates(filters, FILTERS, self.ctx.clock.now()));
        self.fetch_tasks(&predicates, "due_date_c", SortType::Asc).await
    }

    /// Predicates for a board: the fixed prefix, then the extra filters.
    fn board_predicates(&self, bucket: DueBucket, filters: &FilterState) -> Vec<Predicate> {
        let now = self.ctx.clock.now();
        let mut predicates = vec![Predicate::equals("status_c", bucket_status(bucket).as_str())];
        predicates.extend(bucket.predicate("due_date_c", now));
        predicates.extend(build_predicates(filters, BOARD_FILTERS, now));
        predicates
    }

    /// Open tasks due on today's calendar day.
    pub async fn get_due_today(&self, filters: &FilterState) -> CrmResult<Vec<Task>> {
        let predicates = self.board_predicates(DueBucket::DueToday, filters);
        self.fetch_tasks(&predicates, "due_date_c", SortType::Asc).await
    }

    /// Open tasks due after now.
    pub async fn get_upcoming(&self, filters: &FilterState) -> CrmResult<Vec<Task>> {
        let predicates = self.board_predicates(DueBucket::Upcoming, filters);
        self.fetch_tasks(&predicates, "due_date_c", SortType::Asc).await
    }

    /// Completed tasks, most recently touched first.
    pub async fn get_completed(&self, filters: &FilterState) -> CrmResult<Vec<Task>> {
        let predicates = self.board_predicates(DueBucket::Completed, filters);
        self.fetch_tasks(&predicates, "ModifiedOn", SortType::Desc).await
    }

    pub async fn stats(&self) -> CrmResult<TaskStats> {
        let params = QueryParams::with_fields(Task::FIELDS);
        let rows = self.ctx.fetch(ENTITY, Task::TABLE, &params).await?;
        Ok(task_stats(&rows, self.ctx.clock.now()))
    }

    pub async fn get_by_id(&self, id: &str) -> CrmResult<Task> {
        let id = parse_id(id)?;
        let record = self
            .ctx
            .get(ENTITY, Task::TABLE, id, &QueryParams::with_fields(Task::FIELDS))
            .await?;
        Task::from_record(record)
    }

    /// New tasks always start Open.
    pub async fn create(&self, input: &Record) -> CrmResult<Task> {
        let mut record = map_fields(input, MAPPINGS)?;
        record.insert("status_c".to_string(), json!(TaskStatus::Open.as_str()));
        record.entry("notes_c").or_insert_with(|| json!(""));
        check_task(&record)?;

        let created = self.ctx.create_one(ENTITY, Task::TABLE, record).await?;
        log::info!("Created task {:?}", created.get("Id"));
        Task::from_record(created)
    }

    pub async fn update(&self, id: &str, input: &Record) -> CrmResult<Task> {
        let id = parse_id(id)?;
        let patch = map_fields(input, MAPPINGS)?;
        check_task(&patch)?;
        let updated = self.ctx.update_one(ENTITY, Task::TABLE, id, patch).await?;
        Task::from_record(updated)
    }

    pub async fn mark_complete(&self, id: &str) -> CrmResult<Task> {
        let mut input = Record::new();
        input.insert("status_c".to_string(), json!(TaskStatus::Completed.as_str()));
        self.update(id, &input).await
    }

    pub async fn delete(&self, id: &str) -> CrmResult<bool> {
        let id = parse_id(id)?;
        self.ctx.delete_one(ENTITY, Task::TABLE, id).await
    }
}
