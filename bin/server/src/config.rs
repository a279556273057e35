//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`BRIDGE__BASE_URL`, `ENGINE__CANCEL_GRACE_MS`).

use callflow_engine::EngineConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory holding workflow documents as `<id>.json`.
    #[serde(default = "default_workflow_dir")]
    pub workflow_dir: PathBuf,

    /// Provider sidecar configuration.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Execution engine tunables.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Where speech, language, messaging, and call control are served from.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the provider sidecar. Without it only external requests
    /// are wired.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Client-side timeout for bridge and external requests, in milliseconds.
    #[serde(default = "default_bridge_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_workflow_dir() -> PathBuf {
    PathBuf::from("workflows")
}

fn default_bridge_timeout_ms() -> u64 {
    30_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_bridge_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
