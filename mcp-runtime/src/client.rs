use async_trait::async_trait;
use ddmcp_core::error::UpstreamError;
use ddmcp_core::monitors::{MonitorListQuery, MonitorRecord};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::util::client;

pub const DEFAULT_DATADOG_SITE: &str = "datadoghq.com";

/// Call contract for the upstream monitor API.
///
/// Implementations should abort in-flight I/O once `cancel` fires and report
/// [`UpstreamError::Cancelled`]. Callers race the returned future against the
/// same token, so an implementation that ignores it is still abandoned.
#[async_trait]
pub trait MonitorClient: Send + Sync {
    async fn list_monitors(
        &self,
        query: &MonitorListQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<MonitorRecord>, UpstreamError>;

    async fn get_monitor(
        &self,
        id: i64,
        group_states: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MonitorRecord, UpstreamError>;
}

#[derive(Clone, Debug)]
pub struct DatadogConfig {
    /// Base URL such as `https://api.datadoghq.eu`
    pub api_url: String,
    pub api_key: String,
    pub application_key: String,
}

impl DatadogConfig {
    /// Config for a Datadog site (`datadoghq.com`, `us5.datadoghq.com`, `datadoghq.eu`, ...).
    pub fn for_site(site: &str, api_key: String, application_key: String) -> Self {
        let site = site.trim().trim_end_matches('/');
        let site = if site.is_empty() {
            DEFAULT_DATADOG_SITE
        } else {
            site
        };
        Self {
            api_url: format!("https://api.{site}"),
            api_key,
            application_key,
        }
    }
}

/// [`MonitorClient`] backed by the Datadog v1 monitor API.
pub struct DatadogClient {
    config: DatadogConfig,
    http: reqwest::Client,
}

impl DatadogClient {
    pub fn new(config: DatadogConfig) -> Self {
        if config.api_key.trim().is_empty() || config.application_key.trim().is_empty() {
            tracing::warn!(
                api_url = %config.api_url,
                "Datadog API or application key is empty; upstream calls will be rejected"
            );
        }
        Self {
            config,
            http: client(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        Url::parse(&format!(
            "{}{}",
            self.config.api_url.trim_end_matches('/'),
            path
        ))
        .map_err(|e| UpstreamError::Config(format!("invalid API URL/path: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<T, UpstreamError> {
        let request = self
            .http
            .get(url)
            .header("DD-API-KEY", &self.config.api_key)
            .header("DD-APPLICATION-KEY", &self.config.application_key)
            .header(ACCEPT, "application/json");

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| UpstreamError::Transport(format!("failed to read body: {e}")))?;
            if !status.is_success() {
                return Err(UpstreamError::status(
                    status.as_u16(),
                    status_message(status, &bytes),
                ));
            }
            serde_json::from_slice::<T>(&bytes).map_err(|e| UpstreamError::Decode(e.to_string()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            result = exchange => result,
        }
    }
}

#[async_trait]
impl MonitorClient for DatadogClient {
    async fn list_monitors(
        &self,
        query: &MonitorListQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<MonitorRecord>, UpstreamError> {
        let mut url = self.endpoint("/api/v1/monitor")?;
        {
            let mut qp = url.query_pairs_mut();
            let filters = [
                ("group_states", &query.group_states),
                ("name", &query.name),
                ("tags", &query.tags),
                ("monitor_tags", &query.monitor_tags),
            ];
            for (key, value) in filters {
                if let Some(value) = value {
                    qp.append_pair(key, value);
                }
            }
            qp.append_pair("with_downtimes", if query.with_downtimes { "true" } else { "false" });
            qp.append_pair("page", &query.page.to_string());
            qp.append_pair("page_size", &query.page_size.to_string());
        }

        tracing::debug!(url = %url, "listing Datadog monitors");
        self.get_json(url, cancel).await
    }

    async fn get_monitor(
        &self,
        id: i64,
        group_states: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MonitorRecord, UpstreamError> {
        let mut url = self.endpoint(&format!("/api/v1/monitor/{id}"))?;
        if let Some(group_states) = group_states {
            url.query_pairs_mut()
                .append_pair("group_states", group_states);
        }

        tracing::debug!(url = %url, "fetching Datadog monitor");
        self.get_json(url, cancel).await
    }
}

/// Datadog reports failures as `{"errors": ["..."]}`; fall back to the status reason.
fn status_message(status: StatusCode, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            value.get("errors").and_then(Value::as_array).map(|errors| {
                errors
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
        })
        .filter(|detail| !detail.trim().is_empty());

    let detail = detail.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unexpected status")
            .to_string()
    });
    format!("{detail} (HTTP {})", status.as_u16())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ddmcp_core::error::UpstreamError;
    use ddmcp_core::monitors::MonitorListQuery;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    use super::{DatadogClient, DatadogConfig, MonitorClient};

    fn client_for(server: &MockServer) -> DatadogClient {
        DatadogClient::new(DatadogConfig {
            api_url: server.uri(),
            api_key: "api-key".to_string(),
            application_key: "app-key".to_string(),
        })
    }

    #[test]
    fn site_maps_to_api_host() {
        let config = DatadogConfig::for_site("datadoghq.eu", String::new(), String::new());
        assert_eq!(config.api_url, "https://api.datadoghq.eu");

        let config = DatadogConfig::for_site("  ", String::new(), String::new());
        assert_eq!(config.api_url, "https://api.datadoghq.com");
    }

    #[tokio::test]
    async fn list_sends_auth_headers_and_filters() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v1/monitor"))
            .and(matchers::header("DD-API-KEY", "api-key"))
            .and(matchers::header("DD-APPLICATION-KEY", "app-key"))
            .and(matchers::query_param("name", "CPU*"))
            .and(matchers::query_param("monitor_tags", "team:core"))
            .and(matchers::query_param("with_downtimes", "false"))
            .and(matchers::query_param("page", "2"))
            .and(matchers::query_param("page_size", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "name": "CPU Monitor", "overall_state": "OK" },
                { "id": 2, "name": "CPU Steal", "overall_state": "Alert" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let query = MonitorListQuery {
            name: Some("CPU*".to_string()),
            monitor_tags: Some("team:core".to_string()),
            page_size: 10,
            page: 2,
            ..MonitorListQuery::default()
        };
        let monitors = client_for(&server)
            .list_monitors(&query, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(monitors.len(), 2);
        assert_eq!(monitors[1].overall_state, "Alert");
    }

    #[tokio::test]
    async fn list_omits_unset_filters() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v1/monitor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        client_for(&server)
            .list_monitors(
                &MonitorListQuery {
                    page_size: 25,
                    ..MonitorListQuery::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap_or_default().to_string();
        assert!(!query.contains("name="));
        assert!(!query.contains("tags="));
        assert!(!query.contains("group_states="));
        assert!(query.contains("page_size=25"));
    }

    #[tokio::test]
    async fn get_surfaces_datadog_error_text() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v1/monitor/999"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "errors": ["Monitor not found"] })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_monitor(999, None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            UpstreamError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Monitor not found (HTTP 404)");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_forwards_group_states() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v1/monitor/42"))
            .and(matchers::query_param("group_states", "alert,warn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "name": "Disk",
                "type": "metric alert",
                "overall_state": "Warn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let monitor = client_for(&server)
            .get_monitor(42, Some("alert,warn"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(monitor.id, 42);
        assert_eq!(monitor.overall_state, "Warn");
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v1/monitor"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_monitors(&MonitorListQuery::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/v1/monitor"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client_for(&server)
            .list_monitors(&MonitorListQuery::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
