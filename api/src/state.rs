use std::sync::Arc;

use ddmcp_mcp_runtime::McpServer;

use crate::config::SettingsSource;

#[derive(Clone)]
pub struct AppState {
    pub mcp: Arc<McpServer>,
    pub security: SettingsSource,
}
