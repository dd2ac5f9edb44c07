// Contact service
// Companies and their primary contact person.

use serde_json::json;

use super::{map_fields, parse_id, FieldKind, FieldMapping, ServiceContext};
use crate::entity::{is_valid_email, Contact, StoredEntity, INDUSTRIES};
use crate::error::{CrmError, CrmResult};
use crate::filter::{search, SearchField};
use crate::query::{build_predicates, to_where_clauses, FilterKind, FilterSpec};
use crate::store::{FieldError, QueryParams, SortType};
use crate::types::{field_text, FilterState, Record};

const ENTITY: &str = "contact";

const MAPPINGS: &[FieldMapping] = &[
    FieldMapping::new("Name", &["company", "company_c"], FieldKind::Text),
    FieldMapping::new("company_c", &["company", "company_c"], FieldKind::Text),
    FieldMapping::new("contact_person_c", &["contactPerson", "contact_person_c"], FieldKind::Text),
    FieldMapping::new("email_c", &["email", "email_c"], FieldKind::Text),
    FieldMapping::new("phone_c", &["phone", "phone_c"], FieldKind::Text),
    FieldMapping::new("industry_c", &["industry", "industry_c"], FieldKind::Text),
    FieldMapping::new("notes_c", &["notes", "notes_c"], FieldKind::Text),
    FieldMapping::new("last_contact_date_c", &["lastContactDate", "last_contact_date_c"], FieldKind::Date),
];

const FILTERS: &[FilterSpec] = &[
    FilterSpec::new("industry", "industry_c", FilterKind::Equals),
    FilterSpec::new("company", "company_c", FilterKind::Contains),
];

/// Fields the contact list searches as you type.
pub const SEARCH_FIELDS: &[SearchField] = &[
    SearchField::text("company_c"),
    SearchField::text("contact_person_c"),
    SearchField::text("email_c"),
    SearchField::exact("phone_c"),
];

/// Required fields on the contact form, with their labels.
const FORM_FIELDS: &[(&str, &str)] = &[
    ("company_c", "Company"),
    ("contact_person_c", "Contact Person"),
    ("email_c", "Email"),
    ("phone_c", "Phone"),
    ("industry_c", "Industry"),
];

/// Check contact form input before submitting. Accepts the same keys as
/// `create`; returns one error per offending field.
pub fn validate_contact_form(input: &Record) -> Vec<FieldError> {
    let mapped = match map_fields(input, MAPPINGS) {
        Ok(mapped) => mapped,
        Err(err) => {
            return vec![FieldError {
                field_label: "Form".to_string(),
                message: err.to_string(),
            }]
        }
    };

    let mut errors = Vec::new();
    for (field, label) in FORM_FIELDS {
        let value = field_text(&mapped, field).unwrap_or_default();
        if value.trim().is_empty() {
            errors.push(FieldError {
                field_label: (*label).to_string(),
                message: format!("{label} is required"),
            });
        } else if *field == "email_c" && !is_valid_email(&value) {
            errors.push(FieldError {
                field_label: (*label).to_string(),
                message: "Please enter a valid email address".to_string(),
            });
        }
    }
    errors
}

/// Industry is an open set; values outside the known list are kept.
fn note_industry(record: &Record) {
    if let Some(industry) = field_text(record, "industry_c") {
        if !INDUSTRIES.contains(&industry.as_str()) {
            log::debug!("Contact industry {:?} is not a known industry", industry);
        }
    }
}

fn check_email(record: &Record) -> CrmResult<()> {
    match field_text(record, "email_c") {
        Some(email) if !email.trim().is_empty() && !is_valid_email(&email) => Err(
            CrmError::Validation(format!("Invalid email address: {email}")),
        ),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct ContactService {
    ctx: ServiceContext,
}

impl ContactService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn params() -> QueryParams {
        QueryParams::with_fields(Contact::FIELDS).order_by("Id", SortType::Desc)
    }

    pub async fn get_all(&self, filters: &FilterState) -> CrmResult<Vec<Contact>> {
        let predicates = build_predicates(filters, FILTERS, self.ctx.clock.now());
        let params = Self::params().filter(to_where_clauses(&predicates));
        self.ctx
            .fetch(ENTITY, Contact::TABLE, &params)
            .await?
            .into_iter()
            .map(Contact::from_record)
            .collect()
    }

    /// Client-side search over all contacts.
    pub async fn search(&self, query: &str) -> CrmResult<Vec<Contact>> {
        let rows = self.ctx.fetch(ENTITY, Contact::TABLE, &Self::params()).await?;
        search(&rows, query, SEARCH_FIELDS)
            .into_iter()
            .map(Contact::from_record)
            .collect()
    }

    pub async fn get_by_id(&self, id: &str) -> CrmResult<Contact> {
        let id = parse_id(id)?;
        let record = self
            .ctx
            .get(ENTITY, Contact::TABLE, id, &QueryParams::with_fields(Contact::FIELDS))
            .await?;
        Contact::from_record(record)
    }

    pub async fn create(&self, input: &Record) -> CrmResult<Contact> {
        let mut record = map_fields(input, MAPPINGS)?;
        check_email(&record)?;
        note_industry(&record);

        let now = self.ctx.now_timestamp();
        record.insert("last_contact_date_c".to_string(), json!(self.ctx.today()));
        record.insert("created_at_c".to_string(), json!(now));
        record.insert("updated_at_c".to_string(), json!(now));

        let created = self.ctx.create_one(ENTITY, Contact::TABLE, record).await?;
        log::info!("Created contact {:?}", created.get("Id"));
        Contact::from_record(created)
    }

    /// Update only the fields present in `input`.
    pub async fn update(&self, id: &str, input: &Record) -> CrmResult<Contact> {
        let id = parse_id(id)?;
        let mut patch = map_fields(input, MAPPINGS)?;
        check_email(&patch)?;
        note_industry(&patch);
        patch.insert("updated_at_c".to_string(), json!(self.ctx.now_timestamp()));

        let updated = self.ctx.update_one(ENTITY, Contact::TABLE, id, patch).await?;
        Contact::from_record(updated)
    }

    pub async fn delete(&self, id: &str) -> CrmResult<bool> {
        let id = parse_id(id)?;
        self.ctx.delete_one(ENTITY, Contact::TABLE, id).await
    }
}
