use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Datadog monitor as returned by `/api/v1/monitor`.
///
/// Records are read-only snapshots: they are fetched for a single tool call,
/// projected, and dropped. Unknown upstream fields are ignored so new Datadog
/// attributes never break decoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorRecord {
    /// Upstream-assigned monitor ID
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Monitor kind (e.g. "metric alert", "log alert", "composite")
    #[serde(rename = "type", default)]
    pub monitor_type: String,
    #[serde(default)]
    pub query: String,
    /// Notification message template
    #[serde(default)]
    pub message: String,
    /// Current evaluated status: "OK", "Alert", "Warn", "No Data", ...
    /// Kept as text, Datadog adds states over time.
    #[serde(default)]
    pub overall_state: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator: Option<MonitorCreator>,
    #[serde(default)]
    pub options: Option<MonitorOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorCreator {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorOptions {
    #[serde(default)]
    pub notify_no_data: Option<bool>,
    /// Minutes without data before a no-data alert fires
    #[serde(default)]
    pub no_data_timeframe: Option<i64>,
    #[serde(default)]
    pub thresholds: Option<MonitorThresholds>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    #[serde(default)]
    pub critical: Option<f64>,
    #[serde(default)]
    pub warning: Option<f64>,
}

/// Filters and paging sent upstream for a monitor listing.
///
/// `tags` and `monitor_tags` are separate Datadog dimensions: `tags` matches
/// the scope of the monitored query, `monitor_tags` matches tags attached to
/// the monitor itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorListQuery {
    pub group_states: Option<String>,
    pub name: Option<String>,
    pub tags: Option<String>,
    pub monitor_tags: Option<String>,
    pub with_downtimes: bool,
    pub page_size: u32,
    /// Zero-based page index
    pub page: u32,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
