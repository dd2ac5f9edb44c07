//! Group-by counts and sums over fetched records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::DealStage;
use crate::filter::record_is_overdue;
use crate::types::{field_number, field_text, Record};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStat {
    pub key: String,
    pub count: usize,
    pub total: f64,
}

/// Per-group stats in display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupStats {
    pub groups: Vec<GroupStat>,
}

impl GroupStats {
    pub fn get(&self, key: &str) -> Option<&GroupStat> {
        self.groups.iter().find(|g| g.key == key)
    }

    pub fn total_count(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn total_value(&self) -> f64 {
        self.groups.iter().map(|g| g.total).sum()
    }

    fn slot(&mut self, key: &str) -> &mut GroupStat {
        let index = match self.groups.iter().position(|g| g.key == key) {
            Some(index) => index,
            None => {
                self.groups.push(GroupStat {
                    key: key.to_string(),
                    count: 0,
                    total: 0.0,
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }
}

/// Group `records` by `group_field`, counting records and summing
/// `value_field` (missing or non-numeric counts as 0).
///
/// Every `vocabulary` entry appears, in order, even with no records. Values
/// outside the vocabulary follow in first-seen order, and records with no
/// group value land in the `""` group, so every record is counted once.
pub fn group_stats(
    records: &[Record],
    group_field: &str,
    value_field: &str,
    vocabulary: &[&str],
) -> GroupStats {
    let mut stats = GroupStats {
        groups: vocabulary
            .iter()
            .map(|key| GroupStat {
                key: (*key).to_string(),
                count: 0,
                total: 0.0,
            })
            .collect(),
    };

    for record in records {
        let key = field_text(record, group_field).unwrap_or_default();
        let slot = stats.slot(&key);
        slot.count += 1;
        slot.total += field_number(record, value_field).unwrap_or(0.0);
    }

    stats
}

/// Deal counts and values per pipeline stage, in pipeline order.
pub fn pipeline_summary(deals: &[Record]) -> GroupStats {
    group_stats(deals, "stage_c", "value_c", &DealStage::vocabulary())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub open: usize,
    /// Open tasks whose due date has passed.
    pub overdue: usize,
}

pub fn task_stats(tasks: &[Record], now: DateTime<Utc>) -> TaskStats {
    let mut stats = TaskStats {
        total: tasks.len(),
        ..TaskStats::default()
    };
    for task in tasks {
        if field_text(task, "status_c").as_deref() == Some("Completed") {
            stats.completed += 1;
        } else {
            stats.open += 1;
            if record_is_overdue(task, "due_date_c", now) {
                stats.overdue += 1;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_group_stats_with_vocabulary() {
        let deals = vec![
            record(json!({"stage_c": "Lead", "value_c": 100})),
            record(json!({"stage_c": "Lead", "value_c": 50})),
            record(json!({"stage_c": "Qualified", "value_c": 200})),
        ];
        let stats = group_stats(&deals, "stage_c", "value_c", &["Lead", "Qualified"]);
        assert_eq!(
            stats.groups,
            vec![
                GroupStat { key: "Lead".into(), count: 2, total: 150.0 },
                GroupStat { key: "Qualified".into(), count: 1, total: 200.0 },
            ]
        );
    }

    #[test]
    fn test_every_record_counted_once() {
        let deals = vec![
            record(json!({"stage_c": "Lead", "value_c": "10"})),
            record(json!({"stage_c": "Archived", "value_c": 5})),
            record(json!({"value_c": 7})),
            record(json!({"stage_c": "Proposal", "value_c": "n/a"})),
            record(json!({"stage_c": "Archived"})),
        ];
        let stats = pipeline_summary(&deals);
        assert_eq!(stats.total_count(), deals.len());
        assert_eq!(stats.total_value(), 22.0);

        let keys: Vec<&str> = stats.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["Lead", "Qualified", "Proposal", "Negotiation", "Closed Won", "Closed Lost", "Archived", ""]
        );
        assert_eq!(stats.get("Negotiation").unwrap().count, 0);
        assert_eq!(stats.get("Archived").unwrap().count, 2);
        assert_eq!(stats.get("").unwrap().total, 7.0);
    }

    #[test]
    fn test_task_stats_counts_overdue_only_when_open() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let tasks = vec![
            record(json!({"status_c": "Open", "due_date_c": "2024-03-01T09:00:00Z"})),
            record(json!({"status_c": "Completed", "due_date_c": "2024-03-01T09:00:00Z"})),
            record(json!({"status_c": "Open", "due_date_c": "2024-03-05T09:00:00Z"})),
            record(json!({"status_c": "Open"})),
        ];
        assert_eq!(
            task_stats(&tasks, now),
            TaskStats { total: 4, completed: 1, open: 3, overdue: 1 }
        );
    }
}
