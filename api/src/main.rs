use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ddmcp_mcp_runtime::{DatadogArgs, McpServer};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

mod config;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Datadog MCP API",
        description = "Datadog monitor tools exposed over the Model Context Protocol."
    ),
    paths(routes::health::health_check, routes::mcp_http::mcp_post),
    components(schemas(HealthResponse, ddmcp_core::error::ErrorEnvelope)),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            utoipa::openapi::security::SecurityScheme::ApiKey(
                utoipa::openapi::security::ApiKey::Header(
                    utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Parser)]
#[command(name = "ddmcp-api", version, about = "Datadog MCP tools over HTTP")]
struct Cli {
    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Dotenv file re-read on every request for the API-key gate settings
    #[arg(long, env = "DDMCP_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[command(flatten)]
    datadog: DatadogArgs,
}

#[tokio::main]
async fn main() {
    // Snapshot before dotenv loading; the gate re-reads the file on its own
    let process_security_env = config::SettingsSource::capture_process_env();

    // Load .env if present (dev only)
    let loaded_dotenv = dotenvy::dotenv().ok();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ddmcp_api=debug,ddmcp_mcp_runtime=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.env_file
        && let Err(err) = dotenvy::from_path(path)
    {
        tracing::warn!(path = %path.display(), error = %err, "failed to load env file");
    }

    let app_state = state::AppState {
        mcp: Arc::new(McpServer::new(cli.datadog.into_client(), "http")),
        security: config::SettingsSource::Env {
            dotenv_path: cli.env_file.or(loaded_dotenv),
            process_env: process_security_env,
        },
    };

    let app = routes::app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!("Datadog MCP API listening on {}", addr);

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}
