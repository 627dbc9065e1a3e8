use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use clap::{Args, Subcommand};
use ddmcp_core::error::ErrorEnvelope;
use serde_json::{Map, Value, json};
use tokio::io::{self, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

pub mod client;
pub mod monitors;
mod util;

use client::{DEFAULT_DATADOG_SITE, DatadogClient, DatadogConfig, MonitorClient};
use monitors::{ListMonitorsParams, MonitorsTool};
use util::{Framing, read_framed_json, write_framed_json};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "ddmcp";

pub const TOOL_LIST_MONITORS: &str = "list_monitors";
pub const TOOL_LIST_MONITORS_SUMMARY: &str = "list_monitors_summary";
pub const TOOL_GET_MONITOR: &str = "get_monitor";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Datadog MCP server over stdio
    Serve(McpServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    #[command(flatten)]
    pub datadog: DatadogArgs,
}

/// Upstream Datadog credentials and endpoint.
#[derive(Args, Clone, Debug)]
pub struct DatadogArgs {
    /// Datadog API key
    #[arg(long = "dd-api-key", env = "DD_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,
    /// Datadog application key
    #[arg(long = "dd-app-key", env = "DD_APP_KEY", default_value = "", hide_env_values = true)]
    pub application_key: String,
    /// Datadog site, e.g. datadoghq.eu or us5.datadoghq.com
    #[arg(long = "dd-site", env = "DD_SITE", default_value = DEFAULT_DATADOG_SITE)]
    pub site: String,
    /// Explicit API base URL (overrides --dd-site)
    #[arg(long = "dd-api-url", env = "DD_API_URL")]
    pub api_url: Option<String>,
}

impl DatadogArgs {
    pub fn into_config(self) -> DatadogConfig {
        let mut config = DatadogConfig::for_site(&self.site, self.api_key, self.application_key);
        if let Some(api_url) = self.api_url.filter(|url| !url.trim().is_empty()) {
            config.api_url = api_url;
        }
        config
    }

    pub fn into_client(self) -> Arc<dyn MonitorClient> {
        Arc::new(DatadogClient::new(self.into_config()))
    }
}

pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let server = Arc::new(McpServer::new(args.datadog.into_client(), "stdio"));
            match serve_stdio(server).await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
    }
}

/// JSON-RPC dispatcher exposing the monitor tools.
///
/// Holds no per-call state; one instance is shared by every request of a
/// transport and requests may run concurrently.
pub struct McpServer {
    tools: MonitorsTool,
    session_id: String,
}

impl McpServer {
    pub fn new(client: Arc<dyn MonitorClient>, transport: &str) -> Self {
        Self {
            tools: MonitorsTool::new(client),
            session_id: format!("{transport}-{}", Uuid::now_v7()),
        }
    }

    /// Handle one incoming message or batch. Returns the responses to send,
    /// which is empty for notifications and cancelled requests.
    pub async fn handle_incoming_message(
        &self,
        incoming: Value,
        cancel: &CancellationToken,
    ) -> Vec<Value> {
        self.handle_incoming_with(incoming, |_| cancel.clone()).await
    }

    /// Same as [`Self::handle_incoming_message`], but each request of a batch
    /// runs under the token `token_for` returns for it.
    pub async fn handle_incoming_with<F>(&self, incoming: Value, token_for: F) -> Vec<Value>
    where
        F: Fn(&Value) -> CancellationToken + Sync,
    {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                let cancel = token_for(item);
                if let Some(response) = self.handle_single_message(item.clone(), &cancel).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        let cancel = token_for(&incoming);
        if let Some(response) = self.handle_single_message(incoming, &cancel).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(
        &self,
        incoming: Value,
        cancel: &CancellationToken,
    ) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A client response; this server never issues requests of its own.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let Some(id) = obj.get("id").cloned() else {
            self.handle_notification(method);
            return None;
        };

        match self.handle_request(method, params, cancel).await {
            Ok(Some(payload)) => Some(success_response(id, payload)),
            Ok(None) => {
                tracing::debug!(session = %self.session_id, id = %id, method, "request cancelled, no response sent");
                None
            }
            Err(err) => Some(error_response(id, err)),
        }
    }

    fn handle_notification(&self, method: &str) {
        // Cancellation is routed by the transport, which owns the per-request tokens.
        if !matches!(
            method,
            "notifications/initialized" | "notifications/cancelled"
        ) {
            tracing::debug!(session = %self.session_id, method, "ignoring unknown notification");
        }
    }

    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, RpcError> {
        match method {
            "initialize" => Ok(Some(self.initialize_payload())),
            "ping" => Ok(Some(json!({}))),
            "tools/list" => Ok(Some(self.tools_list_payload())),
            "tools/call" => self.handle_tools_call(params, cancel).await,
            "resources/list" => Ok(Some(json!({ "resources": [] }))),
            "prompts/list" => Ok(Some(json!({ "prompts": [] }))),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "resources": {
                    "listChanged": false
                },
                "prompts": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Use list_monitors_summary for a cheap overview of monitor states, then get_monitor for the full definition of a single monitor. Pages hold at most 50 monitors; request the next offset while hasMore is true."
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(
        &self,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        tracing::debug!(session = %self.session_id, tool = name, "dispatching tool call");

        let text = match name {
            TOOL_LIST_MONITORS => match list_params(&args) {
                Ok(list) => self.tools.list_monitors(list, cancel).await,
                Err(message) => Some(invalid_arguments(&message)),
            },
            TOOL_LIST_MONITORS_SUMMARY => match list_params(&args) {
                Ok(list) => self.tools.list_monitors_summary(list, cancel).await,
                Err(message) => Some(invalid_arguments(&message)),
            },
            TOOL_GET_MONITOR => {
                let parsed = required_i64(&args, "id")
                    .and_then(|id| Ok((id, arg_optional_string(&args, "groupStates")?)));
                match parsed {
                    Ok((id, group_states)) => self.tools.get_monitor(id, group_states, cancel).await,
                    Err(message) => Some(invalid_arguments(&message)),
                }
            }
            _ => {
                return Err(RpcError::invalid_params(format!("Unknown tool: {name}")));
            }
        };

        Ok(text.map(build_tool_call_response))
    }
}

/// Run `server` over stdin/stdout until stdin closes.
///
/// Each message runs as its own task. Every request in it, batch members
/// included, gets its own cancellation token keyed by JSON-RPC id, so
/// `notifications/cancelled` can abort it. Cancelled requests write nothing.
pub async fn serve_stdio(server: Arc<McpServer>) -> Result<(), String> {
    let mut reader = BufReader::new(io::stdin());
    let (tx, mut rx) = mpsc::unbounded_channel::<(Value, Framing)>();

    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some((response, framing)) = rx.recv().await {
            write_framed_json(&mut stdout, &response, framing)
                .await
                .map_err(|e| format!("Failed to write MCP response: {e}"))?;
        }
        Ok::<(), String>(())
    });

    let in_flight: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::default();
    let tasks = TaskTracker::new();
    tracing::info!(session = %server.session_id, "MCP stdio server ready");

    let read_result = loop {
        let incoming = match read_framed_json(&mut reader).await {
            Ok(Some(incoming)) => incoming,
            Ok(None) => break Ok(()),
            Err(e) => break Err(format!("Failed to read MCP message: {e}")),
        };
        let (incoming, framing) = incoming;

        if let Some(request_key) = cancelled_request_key(&incoming) {
            let token = in_flight
                .lock()
                .ok()
                .and_then(|mut pending| pending.remove(&request_key));
            if let Some(token) = token {
                tracing::debug!(request = %request_key, "cancelling in-flight request");
                token.cancel();
            }
            continue;
        }

        let batch = is_batch(&incoming);
        let tokens: HashMap<String, CancellationToken> = request_keys(&incoming)
            .into_iter()
            .map(|key| (key, CancellationToken::new()))
            .collect();
        if let Ok(mut pending) = in_flight.lock() {
            for (key, token) in &tokens {
                pending.insert(key.clone(), token.clone());
            }
        }

        let server = server.clone();
        let tx = tx.clone();
        let in_flight = in_flight.clone();
        tasks.spawn(async move {
            let responses = server
                .handle_incoming_with(incoming, |item| {
                    request_key(item)
                        .and_then(|key| tokens.get(&key).cloned())
                        .unwrap_or_else(CancellationToken::new)
                })
                .await;
            if let Ok(mut pending) = in_flight.lock() {
                for key in tokens.keys() {
                    pending.remove(key);
                }
            }
            if let Some(reply) = reply_payload(batch, responses) {
                let _ = tx.send((reply, framing));
            }
        });
    };

    tasks.close();
    tasks.wait().await;
    drop(tx);

    let write_result = writer
        .await
        .map_err(|e| format!("MCP writer task failed: {e}"))?;
    read_result.and(write_result)
}

/// True for a non-empty JSON-RPC batch. An empty array is answered with a
/// single error object.
pub fn is_batch(incoming: &Value) -> bool {
    incoming.as_array().is_some_and(|items| !items.is_empty())
}

/// What goes back on the wire: an array for batches, the lone response
/// otherwise, nothing when no request produced a response.
pub fn reply_payload(batch: bool, mut responses: Vec<Value>) -> Option<Value> {
    if responses.is_empty() {
        return None;
    }
    if batch {
        return Some(Value::Array(responses));
    }
    responses.pop()
}

/// Key under which a single request's cancellation token is registered.
fn request_key(incoming: &Value) -> Option<String> {
    let obj = incoming.as_object()?;
    obj.get("method")?;
    obj.get("id").map(Value::to_string)
}

/// Keys of every request in a message, batch members included.
fn request_keys(incoming: &Value) -> Vec<String> {
    match incoming.as_array() {
        Some(batch) => batch.iter().filter_map(request_key).collect(),
        None => request_key(incoming).into_iter().collect(),
    }
}

fn cancelled_request_key(incoming: &Value) -> Option<String> {
    let obj = incoming.as_object()?;
    if obj.get("method").and_then(Value::as_str) != Some("notifications/cancelled") {
        return None;
    }
    obj.get("params")?.get("requestId").map(Value::to_string)
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn list_input_schema(tags_description: &'static str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Filter by monitor name (supports * wildcards)" },
            "tags": { "type": "string", "description": tags_description },
            "monitorTags": { "type": "string", "description": "Comma-separated tags attached to the monitor itself, e.g. team:backend" },
            "groupStates": { "type": "string", "description": "Comma-separated group states to include: alert, warn, no data, all" },
            "withDowntimes": { "type": "boolean", "default": false, "description": "Include active downtimes for each monitor" },
            "pageSize": { "type": "integer", "default": 25, "description": "Monitors per page, clamped to 1..50" },
            "offset": { "type": "integer", "default": 0, "description": "Zero-based page index" }
        },
        "additionalProperties": false
    })
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_LIST_MONITORS,
            description: "List Datadog monitors with full details (type, query, message, state, priority, tags, creator, thresholds).",
            input_schema: list_input_schema(
                "Comma-separated scope tags of the monitored query, e.g. env:prod",
            ),
        },
        ToolDefinition {
            name: TOOL_LIST_MONITORS_SUMMARY,
            description: "List Datadog monitors as minimal {id, name, state} records. Cheapest way to scan monitor health.",
            input_schema: list_input_schema(
                "Comma-separated tags attached to the monitor itself, e.g. env:prod",
            ),
        },
        ToolDefinition {
            name: TOOL_GET_MONITOR,
            description: "Get the full definition and current state of one Datadog monitor by ID.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer", "description": "Datadog monitor ID" },
                    "groupStates": { "type": "string", "description": "Comma-separated group states to include: alert, warn, no data, all" }
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Wrap the tool's JSON text verbatim; failure envelopes are flagged `isError`.
fn build_tool_call_response(text: String) -> Value {
    let envelope: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let is_error = envelope
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.contains_key("error"));

    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn invalid_arguments(message: &str) -> String {
    ErrorEnvelope::for_operation("Invalid arguments", message).to_json()
}

fn list_params(args: &Map<String, Value>) -> Result<ListMonitorsParams, String> {
    Ok(ListMonitorsParams {
        name: arg_optional_string(args, "name")?,
        tags: arg_optional_string(args, "tags")?,
        monitor_tags: arg_optional_string(args, "monitorTags")?,
        group_states: arg_optional_string(args, "groupStates")?,
        with_downtimes: arg_bool(args, "withDowntimes", false)?,
        page_size: arg_optional_i64(args, "pageSize")?,
        offset: arg_optional_i64(args, "offset")?,
    })
}

fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(format!("'{key}' must be a boolean")),
    }
}

fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(format!("'{key}' must be a string")),
    }
}

fn arg_optional_i64(args: &Map<String, Value>, key: &str) -> Result<Option<i64>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .map(Some)
            .ok_or_else(|| format!("'{key}' must be an integer")),
        Some(_) => Err(format!("'{key}' must be an integer")),
    }
}

fn required_i64(args: &Map<String, Value>, key: &str) -> Result<i64, String> {
    match args.get(key) {
        None | Some(Value::Null) => Err(format!("Missing required field '{key}'")),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("'{key}' must be an integer")),
        Some(_) => Err(format!("'{key}' must be an integer")),
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
