use std::future::Future;
use std::sync::Arc;

use ddmcp_core::error::{ErrorEnvelope, UpstreamError};
use ddmcp_core::monitors::{MonitorListQuery, MonitorRecord};
use ddmcp_core::projections::{MonitorDetail, MonitorPage, MonitorSummary};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::MonitorClient;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MIN_PAGE_SIZE: u32 = 1;
pub const MAX_PAGE_SIZE: u32 = 50;

const LIST_FAILURE: &str = "Failed to list monitors";

/// Caller-supplied arguments of the two list tools, before any clamping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListMonitorsParams {
    /// Name glob, e.g. `CPU*`
    pub name: Option<String>,
    pub tags: Option<String>,
    pub monitor_tags: Option<String>,
    pub group_states: Option<String>,
    pub with_downtimes: bool,
    pub page_size: Option<i64>,
    /// Zero-based page index
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Full,
    Summary,
}

/// Page size actually sent upstream: 25 when absent, otherwise clamped into 1..=50.
pub fn clamp_page_size(requested: Option<i64>) -> u32 {
    match requested {
        None => DEFAULT_PAGE_SIZE,
        Some(size) => size.clamp(i64::from(MIN_PAGE_SIZE), i64::from(MAX_PAGE_SIZE)) as u32,
    }
}

fn page_index(offset: Option<i64>) -> u32 {
    offset.unwrap_or(0).clamp(0, i64::from(u32::MAX)) as u32
}

/// Monitor query service behind the `list_monitors`, `list_monitors_summary`
/// and `get_monitor` tools.
///
/// Every entry point returns JSON text: the success envelope or
/// `{"error": ...}`. `None` means the call was cancelled and nothing should be
/// sent back.
#[derive(Clone)]
pub struct MonitorsTool {
    client: Arc<dyn MonitorClient>,
}

impl MonitorsTool {
    pub fn new(client: Arc<dyn MonitorClient>) -> Self {
        Self { client }
    }

    pub async fn list_monitors(
        &self,
        params: ListMonitorsParams,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let query = MonitorListQuery {
            group_states: params.group_states,
            name: params.name,
            tags: params.tags,
            monitor_tags: params.monitor_tags,
            with_downtimes: params.with_downtimes,
            page_size: clamp_page_size(params.page_size),
            page: page_index(params.offset),
        };
        self.list(query, Projection::Full, cancel).await
    }

    /// Same paging as [`Self::list_monitors`], minimal `{id, name, state}` records.
    ///
    /// The caller's `tags` filter targets the monitor-tag dimension here, not
    /// the query-scope `tags` dimension used by the full listing.
    pub async fn list_monitors_summary(
        &self,
        params: ListMonitorsParams,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let monitor_tags = [params.tags, params.monitor_tags]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        let query = MonitorListQuery {
            group_states: params.group_states,
            name: params.name,
            tags: None,
            monitor_tags: (!monitor_tags.is_empty()).then(|| monitor_tags.join(",")),
            with_downtimes: params.with_downtimes,
            page_size: clamp_page_size(params.page_size),
            page: page_index(params.offset),
        };
        self.list(query, Projection::Summary, cancel).await
    }

    pub async fn get_monitor(
        &self,
        id: i64,
        group_states: Option<String>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let fetch = self.client.get_monitor(id, group_states.as_deref(), cancel);
        match until_cancelled(cancel, fetch).await? {
            Ok(record) => Some(to_json(&MonitorDetail::from(&record))),
            Err(err) if err.is_cancelled() => None,
            Err(err) => Some(error_envelope(&format!("Failed to get monitor {id}"), &err)),
        }
    }

    async fn list(
        &self,
        query: MonitorListQuery,
        projection: Projection,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let page_size = query.page_size;
        let records: Vec<MonitorRecord> =
            match until_cancelled(cancel, self.client.list_monitors(&query, cancel)).await? {
                Ok(records) => records,
                Err(err) if err.is_cancelled() => return None,
                Err(err) => return Some(error_envelope(LIST_FAILURE, &err)),
            };

        tracing::debug!(
            count = records.len(),
            page_size,
            page = query.page,
            "listed monitors"
        );

        Some(match projection {
            Projection::Full => to_json(&MonitorPage::new(
                records.iter().map(MonitorDetail::from).collect(),
                page_size,
            )),
            Projection::Summary => to_json(&MonitorPage::new(
                records.iter().map(MonitorSummary::from).collect(),
                page_size,
            )),
        })
    }
}

/// Turns an upstream failure into `{"error": "<operation>: <message>"}`.
pub fn error_envelope(operation: &str, err: &UpstreamError) -> String {
    tracing::warn!(error = %err, operation, "upstream monitor call failed");
    ErrorEnvelope::for_operation(operation, err).to_json()
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        ErrorEnvelope::for_operation("Failed to serialize response", err).to_json()
    })
}
