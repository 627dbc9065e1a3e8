use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ddmcp_core::error::ErrorEnvelope;

use crate::config::SettingsSource;

pub const API_KEY_HEADER: &str = "x-api-key";
const HEALTH_PATH: &str = "/health";

/// Shared-secret gate in front of everything except the health endpoint.
///
/// Settings are resolved per request. The presented key must match the
/// configured one byte for byte; an empty configured key matches nothing.
pub async fn require_api_key(
    State(source): State<SettingsSource>,
    req: Request,
    next: Next,
) -> Response {
    let settings = source.current().await;
    if !settings.require_api_key {
        return next.run(req).await;
    }

    let path = req.uri().path();
    if is_health_path(path) {
        return next.run(req).await;
    }

    let Some(provided) = req.headers().get(API_KEY_HEADER) else {
        tracing::warn!(path = %path, "rejected request without API key");
        return unauthorized("API key is required");
    };

    let configured = settings.api_key.as_bytes();
    if settings.api_key.trim().is_empty() || provided.as_bytes() != configured {
        tracing::warn!(path = %path, "rejected request with invalid API key");
        return unauthorized("Invalid API key");
    }

    next.run(req).await
}

/// `/health` itself or anything below it, compared per path segment.
fn is_health_path(path: &str) -> bool {
    let Some(prefix) = path.get(..HEALTH_PATH.len()) else {
        return false;
    };
    if !prefix.eq_ignore_ascii_case(HEALTH_PATH) {
        return false;
    }
    matches!(path.as_bytes().get(HEALTH_PATH.len()), None | Some(b'/'))
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorEnvelope::new(message))).into_response()
}
