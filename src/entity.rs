//! Typed CRM records and their fixed vocabularies.
//!
//! Field names follow the table schema (`Name`, `company_c`, ...) so a typed
//! record serializes back into the same shape the store and the client-side
//! filters work with. Reference fields arrive either as a bare id or as a
//! `{Id, Name}` lookup; both decode into `Reference`.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CrmError, CrmResult};
use crate::types::Record;

/// A record stored in a named table.
pub trait StoredEntity: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    /// Storage fields projected on fetch.
    const FIELDS: &'static [&'static str];

    fn from_record(record: Record) -> CrmResult<Self> {
        serde_json::from_value(Value::Object(record))
            .map_err(|e| CrmError::remote(format!("Malformed {} record: {}", Self::TABLE, e)))
    }

    fn to_record(&self) -> Record {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Record::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Link to another record, e.g. a deal's company or a task's contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawReference {
            Id(i64),
            Text(String),
            Lookup {
                #[serde(rename = "Id")]
                id: i64,
                #[serde(rename = "Name", default)]
                name: Option<String>,
            },
        }

        match RawReference::deserialize(deserializer)? {
            RawReference::Id(id) => Ok(Reference { id, name: None }),
            RawReference::Text(s) => s
                .trim()
                .parse()
                .map(|id| Reference { id, name: None })
                .map_err(|_| D::Error::custom(format!("invalid reference id: {s}"))),
            RawReference::Lookup { id, name } => Ok(Reference { id, name }),
        }
    }
}

fn de_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    // Stored as number; older rows carry numeric strings or null.
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => Ok(n.as_f64().unwrap_or(0.0)),
        Some(Value::String(s)) => Ok(s.trim().parse().unwrap_or(0.0)),
        _ => Ok(0.0),
    }
}

fn de_percentage<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = de_number(deserializer)?;
    Ok(clamp_probability(raw.round() as i64))
}

/// Vocabulary values; null or blank decodes to the default.
fn de_vocabulary<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(T::default()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(D::Error::custom),
    }
}

pub fn clamp_probability(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

// ---------------------------------------------------------------------------
// Vocabularies
// ---------------------------------------------------------------------------

/// Deal pipeline stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DealStage {
    #[default]
    Lead,
    Qualified,
    Proposal,
    Negotiation,
    #[serde(rename = "Closed Won")]
    ClosedWon,
    #[serde(rename = "Closed Lost")]
    ClosedLost,
}

impl DealStage {
    pub const ALL: [DealStage; 6] = [
        DealStage::Lead,
        DealStage::Qualified,
        DealStage::Proposal,
        DealStage::Negotiation,
        DealStage::ClosedWon,
        DealStage::ClosedLost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DealStage::Lead => "Lead",
            DealStage::Qualified => "Qualified",
            DealStage::Proposal => "Proposal",
            DealStage::Negotiation => "Negotiation",
            DealStage::ClosedWon => "Closed Won",
            DealStage::ClosedLost => "Closed Lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s.trim())
    }

    /// Stage names in pipeline order, for grouping.
    pub fn vocabulary() -> Vec<&'static str> {
        Self::ALL.iter().map(DealStage::as_str).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Open,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s.trim())
    }
}

pub const TASK_TYPES: &[&str] = &["Follow-up Call", "Send Proposal", "Meeting Prep"];

pub const INDUSTRIES: &[&str] = &[
    "Technology",
    "Healthcare",
    "Finance",
    "Education",
    "Manufacturing",
    "Retail",
    "Real Estate",
    "Consulting",
    "Media",
    "Government",
    "Non-Profit",
    "Other",
];

fn re_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\S+@\S+\.\S+$").unwrap())
}

/// Basic `local@domain.tld` shape check.
pub fn is_valid_email(email: &str) -> bool {
    re_email().is_match(email.trim())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "company_c", default)]
    pub company: Option<String>,
    #[serde(rename = "contact_person_c", default)]
    pub contact_person: Option<String>,
    #[serde(rename = "email_c", default)]
    pub email: Option<String>,
    #[serde(rename = "phone_c", default)]
    pub phone: Option<String>,
    #[serde(rename = "industry_c", default)]
    pub industry: Option<String>,
    #[serde(rename = "last_contact_date_c", default)]
    pub last_contact_date: Option<String>,
    #[serde(rename = "notes_c", default)]
    pub notes: Option<String>,
    #[serde(rename = "created_at_c", default)]
    pub created_at: Option<String>,
    #[serde(rename = "updated_at_c", default)]
    pub updated_at: Option<String>,
}

impl StoredEntity for Contact {
    const TABLE: &'static str = "contact_c";
    const FIELDS: &'static [&'static str] = &[
        "Name",
        "company_c",
        "contact_person_c",
        "email_c",
        "phone_c",
        "industry_c",
        "last_contact_date_c",
        "notes_c",
        "created_at_c",
        "updated_at_c",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "value_c", default, deserialize_with = "de_number")]
    pub value: f64,
    #[serde(rename = "expected_close_date_c", default)]
    pub expected_close_date: Option<String>,
    #[serde(rename = "stage_c", default, deserialize_with = "de_vocabulary")]
    pub stage: DealStage,
    #[serde(rename = "probability_percentage_c", default, deserialize_with = "de_percentage")]
    pub probability: u8,
    #[serde(rename = "company_c", default)]
    pub company: Option<Reference>,
    #[serde(rename = "last_activity_date_c", default)]
    pub last_activity_date: Option<String>,
    #[serde(rename = "description_c", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "contact_c", default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Reference>,
    #[serde(rename = "next_follow_up_c", default, skip_serializing_if = "Option::is_none")]
    pub next_follow_up: Option<String>,
    #[serde(rename = "completed_date_c", default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<String>,
    #[serde(rename = "completed_by_c", default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(rename = "rescheduled_from_c", default, skip_serializing_if = "Option::is_none")]
    pub rescheduled_from: Option<String>,
}

impl StoredEntity for Deal {
    const TABLE: &'static str = "deal_c";
    const FIELDS: &'static [&'static str] = &[
        "Name",
        "value_c",
        "expected_close_date_c",
        "stage_c",
        "probability_percentage_c",
        "company_c",
        "last_activity_date_c",
        "description_c",
        "contact_c",
        "next_follow_up_c",
        "completed_date_c",
        "completed_by_c",
        "rescheduled_from_c",
        "CreatedOn",
        "ModifiedOn",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "description_c", default)]
    pub description: Option<String>,
    #[serde(rename = "priority_c", default, deserialize_with = "de_vocabulary")]
    pub priority: Option<Priority>,
    #[serde(rename = "due_date_c", default)]
    pub due_date: Option<String>,
    #[serde(rename = "contact_c", default)]
    pub contact: Option<Reference>,
    #[serde(rename = "deal_c", default)]
    pub deal: Option<Reference>,
    #[serde(rename = "type_c", default)]
    pub task_type: Option<String>,
    #[serde(rename = "status_c", default, deserialize_with = "de_vocabulary")]
    pub status: TaskStatus,
    #[serde(rename = "notes_c", default)]
    pub notes: Option<String>,
    #[serde(rename = "ModifiedOn", default, skip_serializing_if = "Option::is_none")]
    pub modified_on: Option<String>,
}

impl StoredEntity for Task {
    const TABLE: &'static str = "task_c";
    const FIELDS: &'static [&'static str] = &[
        "Name",
        "description_c",
        "priority_c",
        "due_date_c",
        "contact_c",
        "deal_c",
        "type_c",
        "status_c",
        "notes_c",
        "CreatedOn",
        "ModifiedOn",
    ];
}

/// Headline number on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub label: String,
    pub value: String,
    pub trend: Option<String>,
    pub trend_direction: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub id: i64,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub time: Option<String>,
    pub activity_type: Option<String>,
}
