use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ddmcp_core::error::ErrorEnvelope;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

const MCP_PATH: &str = "/mcp";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, post(mcp_post).get(mcp_get))
}

async fn mcp_get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

/// JSON-RPC endpoint for MCP clients (single message or batch).
///
/// Dropping the request (client disconnect) cancels any in-flight tool call.
#[utoipa::path(
    post,
    path = "/mcp",
    request_body(content = String, content_type = "application/json", description = "JSON-RPC request, notification or batch"),
    responses(
        (status = 200, description = "JSON-RPC response, or an array of responses for a batch"),
        (status = 202, description = "Only notifications were received"),
        (status = 401, description = "Missing or invalid API key", body = ErrorEnvelope)
    ),
    security(("api_key" = [])),
    tag = "mcp"
)]
pub async fn mcp_post(State(state): State<AppState>, body: Bytes) -> Response {
    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": -32700,
                        "message": "Parse error"
                    }
                })),
            )
                .into_response();
        }
    };

    let batch = ddmcp_mcp_runtime::is_batch(&incoming);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let responses = state.mcp.handle_incoming_message(incoming, &cancel).await;
    guard.disarm();

    match ddmcp_mcp_runtime::reply_payload(batch, responses) {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
