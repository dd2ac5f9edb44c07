// Dashboard service
// Headline metrics and the recent activity feed.

use super::ServiceContext;
use crate::entity::{Metric, RecentActivity};
use crate::error::CrmResult;
use crate::store::{QueryParams, SortType};
use crate::types::{field_reference, field_text, Record};

const METRIC_TABLE: &str = "dashboard_metric_c";
const ACTIVITY_TABLE: &str = "recent_activity_c";

/// Activities shown when the caller doesn't ask for a specific count.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 10;

fn metric_from_record(record: &Record) -> Metric {
    Metric {
        label: field_text(record, "label_c")
            .or_else(|| field_text(record, "Name"))
            .unwrap_or_default(),
        value: field_text(record, "value_c").unwrap_or_default(),
        trend: field_text(record, "trend_c"),
        trend_direction: field_text(record, "trend_direction_c"),
        icon: field_text(record, "icon_c"),
    }
}

fn activity_from_record(record: &Record) -> Option<RecentActivity> {
    let id = field_reference(record, "Id")?;
    Some(RecentActivity {
        id,
        description: field_text(record, "description_c"),
        contact: field_text(record, "contact_c"),
        time: field_text(record, "time_c"),
        activity_type: field_text(record, "type_c"),
    })
}

#[derive(Clone)]
pub struct DashboardService {
    ctx: ServiceContext,
}

impl DashboardService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn get_metrics(&self) -> CrmResult<Vec<Metric>> {
        let params = QueryParams::with_fields(&[
            "Name",
            "label_c",
            "value_c",
            "trend_c",
            "trend_direction_c",
            "icon_c",
        ])
        .order_by("Id", SortType::Asc);
        let rows = self.ctx.fetch("dashboard metric", METRIC_TABLE, &params).await?;
        Ok(rows.iter().map(metric_from_record).collect())
    }

    /// Newest activities first, at most `limit` of them.
    pub async fn get_recent_activities(&self, limit: Option<usize>) -> CrmResult<Vec<RecentActivity>> {
        let params = QueryParams::with_fields(&["Name", "description_c", "contact_c", "time_c", "type_c"])
            .order_by("Id", SortType::Desc)
            .page(limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT), 0);
        let rows = self.ctx.fetch("recent activity", ACTIVITY_TABLE, &params).await?;
        Ok(rows.iter().filter_map(activity_from_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrmError;
    use crate::services::testing::{context, record};
    use crate::store::mock::MockStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_metrics_in_id_order() {
        let store = MockStore::new().with_table(
            METRIC_TABLE,
            vec![
                record(json!({"Id": 2, "label_c": "Open Deals", "value_c": 12, "trend_c": "+3",
                              "trend_direction_c": "up", "icon_c": "Briefcase"})),
                record(json!({"Id": 1, "label_c": "Total Contacts", "value_c": "148"})),
            ],
        );
        let (ctx, _) = context(store);
        let metrics = DashboardService::new(ctx).get_metrics().await.unwrap();
        assert_eq!(metrics[0].label, "Total Contacts");
        assert_eq!(metrics[1].value, "12");
        assert_eq!(metrics[1].trend_direction.as_deref(), Some("up"));
    }

    #[tokio::test]
    async fn test_recent_activities_newest_first_and_limited() {
        let rows = (1..=15)
            .map(|i| record(json!({"Id": i, "description_c": format!("Activity {i}"),
                                   "contact_c": {"Id": 7, "Name": "Acme"}, "type_c": "call"})))
            .collect();
        let (ctx, _) = context(MockStore::new().with_table(ACTIVITY_TABLE, rows));
        let service = DashboardService::new(ctx);

        let feed = service.get_recent_activities(None).await.unwrap();
        assert_eq!(feed.len(), DEFAULT_ACTIVITY_LIMIT);
        assert_eq!(feed[0].id, 15);
        assert_eq!(feed[0].contact.as_deref(), Some("Acme"));

        let short = service.get_recent_activities(Some(3)).await.unwrap();
        assert_eq!(short.iter().map(|a| a.id).collect::<Vec<_>>(), vec![15, 14, 13]);
    }

    #[tokio::test]
    async fn test_rejected_fetch_surfaces_message() {
        let store = MockStore::new();
        store.fail_next("Table dashboard_metric_c does not exist");
        let (ctx, _) = context(store);
        let err = DashboardService::new(ctx).get_metrics().await.unwrap_err();
        assert!(matches!(err, CrmError::RemoteFailure { .. }));
        assert_eq!(err.to_string(), "Table dashboard_metric_c does not exist");
    }
}
