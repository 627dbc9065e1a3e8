use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

pub const REQUIRE_API_KEY_VAR: &str = "DDMCP_REQUIRE_API_KEY";
pub const API_KEY_VAR: &str = "DDMCP_API_KEY";

/// Gate configuration as seen by one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecuritySettings {
    pub require_api_key: bool,
    pub api_key: String,
}

impl SecuritySettings {
    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            require_api_key: lookup(REQUIRE_API_KEY_VAR)
                .map(|v| require_flag(&v))
                .unwrap_or(false),
            api_key: lookup(API_KEY_VAR).unwrap_or_default(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Unrecognised values keep the gate closed.
fn require_flag(raw: &str) -> bool {
    parse_flag(raw).unwrap_or_else(|| {
        tracing::warn!(
            variable = REQUIRE_API_KEY_VAR,
            value = raw,
            "unrecognised boolean, enforcing the API key"
        );
        true
    })
}

/// Where the gate reads its settings from. Resolved on every request so a
/// changed dotenv file takes effect without a restart.
#[derive(Clone, Debug)]
pub enum SettingsSource {
    /// Dotenv file (if any) over a snapshot of the process environment taken
    /// before any dotenv file was loaded into it.
    Env {
        dotenv_path: Option<PathBuf>,
        process_env: HashMap<String, String>,
    },
    /// Fixed in-process handle, swapped by whoever holds it.
    Shared(Arc<RwLock<SecuritySettings>>),
}

impl SettingsSource {
    pub fn shared(settings: SecuritySettings) -> (Self, Arc<RwLock<SecuritySettings>>) {
        let handle = Arc::new(RwLock::new(settings));
        (Self::Shared(handle.clone()), handle)
    }

    /// The gate variables currently set in the process environment.
    pub fn capture_process_env() -> HashMap<String, String> {
        [REQUIRE_API_KEY_VAR, API_KEY_VAR]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect()
    }

    pub async fn current(&self) -> SecuritySettings {
        match self {
            Self::Shared(handle) => handle.read().await.clone(),
            Self::Env {
                dotenv_path,
                process_env,
            } => {
                let file_vars = match dotenv_path {
                    Some(path) => read_dotenv(path).await,
                    None => HashMap::new(),
                };
                SecuritySettings::resolve(|key| {
                    file_vars
                        .get(key)
                        .or_else(|| process_env.get(key))
                        .cloned()
                })
            }
        }
    }
}

async fn read_dotenv(path: &Path) -> HashMap<String, String> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "dotenv file unreadable, using process environment");
            return HashMap::new();
        }
    };

    dotenvy::from_read_iter(contents.as_slice())
        .filter_map(|item| match item {
            Ok(pair) => Some(pair),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping malformed dotenv line");
                None
            }
        })
        .collect()
}
