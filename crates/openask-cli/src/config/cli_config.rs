//! CLI configuration file support
//!
//! Loads configuration from ~/.config/openask/config.toml

use anyhow::{Result, bail};
use openask_engine::{EngineConfig, Protocol};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cli::ConnectionArgs;

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Backend connection
    #[serde(default)]
    pub server: ServerConfig,
    /// Chat behaviour
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub api_url: Option<String>,
    pub project: Option<String>,
    pub protocol: Option<Protocol>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Shown when the assistant finishes without text
    pub empty_response_text: Option<String>,
    pub expose_reasoning: Option<bool>,
    pub request_timeout_secs: Option<u64>,
}

impl CliConfig {
    /// Load configuration from default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unparsable config file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("openask").join("config.toml"))
    }

    /// Build the engine configuration. Flags and environment variables win
    /// over the config file.
    pub fn engine_config(&self, overrides: &ConnectionArgs) -> Result<EngineConfig> {
        let Some(api_url) = overrides
            .api_url
            .clone()
            .or_else(|| self.server.api_url.clone())
        else {
            bail!("No API URL configured. Pass --api-url, set OPENASK_API_URL, or set server.api_url in the config file");
        };

        let protocol = overrides
            .protocol
            .or(self.server.protocol)
            .unwrap_or_default();

        let mut config = EngineConfig::new(api_url, protocol);
        config.project_id = overrides
            .project
            .clone()
            .or_else(|| self.server.project.clone());
        if let Some(text) = &self.chat.empty_response_text {
            config.empty_response_text = text.clone();
        }
        config.expose_reasoning =
            overrides.reasoning || self.chat.expose_reasoning.unwrap_or(false);
        config.request_timeout_secs = self.chat.request_timeout_secs;

        config.validate()?;
        Ok(config)
    }
}
