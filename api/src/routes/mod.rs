use axum::routing::get;
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::ApiDoc;
use crate::middleware::api_key::require_api_key;
use crate::state::AppState;

pub mod health;
pub mod mcp_http;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(health::router())
        .merge(mcp_http::router())
        .layer(axum::middleware::from_fn_with_state(
            state.security.clone(),
            require_api_key,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
