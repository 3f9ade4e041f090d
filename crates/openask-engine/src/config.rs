//! Engine configuration

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Fallback shown when the assistant finishes without producing any text.
pub const DEFAULT_EMPTY_RESPONSE_TEXT: &str = "Something went wrong. Please try again later.";

/// Wire protocol spoken by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Server-side session, `event:`/`data:` SSE frames.
    #[default]
    Session,
    /// Connectionless, `0:<json>` tagged lines carrying UI message chunks.
    ChunkStream,
}

impl Protocol {
    pub fn uses_session(self) -> bool {
        matches!(self, Protocol::Session)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Session => write!(f, "session"),
            Protocol::ChunkStream => write!(f, "chunk-stream"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" | "sse" => Ok(Protocol::Session),
            "chunk-stream" | "chunk" | "ui-message" => Ok(Protocol::ChunkStream),
            other => Err(ChatError::InvalidConfig(format!(
                "unknown protocol '{}'",
                other
            ))),
        }
    }
}

/// Chat engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which wire protocol the backend speaks
    pub protocol: Protocol,
    /// Base URL (session protocol) or full chat endpoint (chunk-stream protocol)
    pub api_url: String,
    /// Optional project scope
    pub project_id: Option<String>,
    /// Text substituted when a completed answer is blank
    pub empty_response_text: String,
    /// Include reasoning parts in published snapshots
    pub expose_reasoning: bool,
    /// Connect timeout for HTTP requests
    pub request_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            api_url: String::new(),
            project_id: None,
            empty_response_text: DEFAULT_EMPTY_RESPONSE_TEXT.to_string(),
            expose_reasoning: false,
            request_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Create a config for the given endpoint and protocol
    pub fn new(api_url: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            protocol,
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Scope requests to a project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the fallback text for blank answers
    pub fn with_empty_response_text(mut self, text: impl Into<String>) -> Self {
        self.empty_response_text = text.into();
        self
    }

    /// Expose reasoning parts to subscribers
    pub fn with_reasoning(mut self, expose: bool) -> Self {
        self.expose_reasoning = expose;
        self
    }

    /// Check that the endpoint is usable.
    pub fn validate(&self) -> Result<()> {
        let trimmed = self.api_url.trim();
        if trimmed.is_empty() {
            return Err(ChatError::InvalidConfig("api_url is empty".to_string()));
        }

        let parsed = url::Url::parse(trimmed)
            .map_err(|e| ChatError::InvalidConfig(format!("api_url '{}': {}", trimmed, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ChatError::InvalidConfig(format!(
                "api_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        if let Some(project) = &self.project_id
            && project.trim().is_empty()
        {
            return Err(ChatError::InvalidConfig(
                "project_id must not be blank".to_string(),
            ));
        }

        Ok(())
    }
}
