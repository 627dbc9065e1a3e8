use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitors::{MonitorCreator, MonitorOptions, MonitorRecord, MonitorThresholds};

/// Full monitor shape returned by `list_monitors` and `get_monitor`.
///
/// Every key is always present; fields Datadog did not send serialize as `null`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDetail<'a> {
    pub id: i64,
    pub name: &'a str,
    #[serde(rename = "type")]
    pub monitor_type: &'a str,
    pub query: &'a str,
    pub message: &'a str,
    pub state: &'a str,
    pub priority: Option<i64>,
    pub tags: &'a [String],
    pub created: Option<DateTime<Utc>>,
    pub creator: Option<CreatorDetail<'a>>,
    pub options: Option<OptionsDetail>,
}

#[derive(Debug, Serialize)]
pub struct CreatorDetail<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsDetail {
    pub notify_no_data: Option<bool>,
    pub no_data_timeframe: Option<i64>,
    pub thresholds: Option<ThresholdsDetail>,
}

#[derive(Debug, Serialize)]
pub struct ThresholdsDetail {
    pub critical: Option<f64>,
    pub warning: Option<f64>,
}

/// Minimal monitor shape returned by `list_monitors_summary`.
/// Carries exactly `id`, `name` and `state`.
#[derive(Debug, Serialize)]
pub struct MonitorSummary<'a> {
    pub id: i64,
    pub name: &'a str,
    pub state: &'a str,
}

/// One page of projected monitors.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorPage<T: Serialize> {
    pub count: usize,
    /// True when the page came back full. A hint that another page may
    /// exist, not an authoritative total.
    pub has_more: bool,
    pub monitors: Vec<T>,
}

impl<T: Serialize> MonitorPage<T> {
    pub fn new(monitors: Vec<T>, page_size: u32) -> Self {
        let count = monitors.len();
        Self {
            count,
            has_more: count == page_size as usize,
            monitors,
        }
    }
}

impl<'a> From<&'a MonitorRecord> for MonitorDetail<'a> {
    fn from(record: &'a MonitorRecord) -> Self {
        Self {
            id: record.id,
            name: &record.name,
            monitor_type: &record.monitor_type,
            query: &record.query,
            message: &record.message,
            state: &record.overall_state,
            priority: record.priority,
            tags: &record.tags,
            created: record.created,
            creator: record.creator.as_ref().map(CreatorDetail::from),
            options: record.options.as_ref().map(OptionsDetail::from),
        }
    }
}

impl<'a> From<&'a MonitorCreator> for CreatorDetail<'a> {
    fn from(creator: &'a MonitorCreator) -> Self {
        Self {
            name: creator.name.as_deref(),
            email: creator.email.as_deref(),
        }
    }
}

impl From<&MonitorOptions> for OptionsDetail {
    fn from(options: &MonitorOptions) -> Self {
        Self {
            notify_no_data: options.notify_no_data,
            no_data_timeframe: options.no_data_timeframe,
            thresholds: options.thresholds.as_ref().map(ThresholdsDetail::from),
        }
    }
}

impl From<&MonitorThresholds> for ThresholdsDetail {
    fn from(thresholds: &MonitorThresholds) -> Self {
        Self {
            critical: thresholds.critical,
            warning: thresholds.warning,
        }
    }
}

impl<'a> From<&'a MonitorRecord> for MonitorSummary<'a> {
    fn from(record: &'a MonitorRecord) -> Self {
        Self {
            id: record.id,
            name: &record.name,
            state: &record.overall_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{Value, json};

    use super::{MonitorDetail, MonitorPage, MonitorSummary};
    use crate::monitors::{MonitorCreator, MonitorOptions, MonitorRecord, MonitorThresholds};

    fn rich_record() -> MonitorRecord {
        MonitorRecord {
            id: 123,
            name: "CPU Monitor".to_string(),
            monitor_type: "metric alert".to_string(),
            query: "avg(last_5m):avg:system.cpu.user{*} > 90".to_string(),
            message: "CPU usage is high".to_string(),
            overall_state: "OK".to_string(),
            priority: Some(3),
            tags: vec!["env:prod".to_string()],
            created: Some(Utc::now()),
            creator: Some(MonitorCreator {
                name: Some("John Doe".to_string()),
                email: Some("john@example.com".to_string()),
            }),
            options: Some(MonitorOptions {
                notify_no_data: Some(true),
                no_data_timeframe: Some(10),
                thresholds: Some(MonitorThresholds {
                    critical: Some(90.0),
                    warning: Some(80.0),
                }),
            }),
        }
    }

    #[test]
    fn summary_carries_only_id_name_and_state() {
        let record = rich_record();
        let value = serde_json::to_value(MonitorSummary::from(&record)).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();

        assert_eq!(keys.len(), 3);
        assert_eq!(value, json!({ "id": 123, "name": "CPU Monitor", "state": "OK" }));
    }

    #[test]
    fn detail_uses_camel_case_nested_options() {
        let record = rich_record();
        let value = serde_json::to_value(MonitorDetail::from(&record)).unwrap();

        assert_eq!(value["type"], "metric alert");
        assert_eq!(value["state"], "OK");
        assert_eq!(value["creator"]["email"], "john@example.com");
        assert_eq!(value["options"]["notifyNoData"], true);
        assert_eq!(value["options"]["noDataTimeframe"], 10);
        assert_eq!(value["options"]["thresholds"]["warning"], 80.0);
    }

    #[test]
    fn detail_keeps_absent_fields_as_null() {
        let record = MonitorRecord {
            id: 1,
            name: "bare".to_string(),
            ..MonitorRecord::default()
        };
        let value = serde_json::to_value(MonitorDetail::from(&record)).unwrap();

        for key in ["priority", "created", "creator", "options"] {
            assert_eq!(value.get(key), Some(&Value::Null), "{key} should be null");
        }
        assert_eq!(value["tags"], json!([]));
    }

    #[test]
    fn page_reports_has_more_only_when_full() {
        let full = MonitorPage::new(vec![1, 2, 3], 3);
        assert_eq!(full.count, 3);
        assert!(full.has_more);

        let partial = MonitorPage::new(vec![1, 2], 3);
        assert!(!partial.has_more);

        let value = serde_json::to_value(&partial).unwrap();
        assert_eq!(value["hasMore"], false);
        assert_eq!(value["count"], 2);
    }
}
