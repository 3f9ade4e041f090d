//! Transcript data model
//!
//! Messages serialize in the UI message shape expected by chunk-stream
//! backends, which receive the whole transcript on every request.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocate the next process-unique message id.
pub fn next_message_id() -> String {
    let n = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("msg-{}", n)
}

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a text or reasoning part
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextState {
    Streaming,
    Done,
}

/// Lifecycle of a tool call part
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    #[serde(rename = "error", alias = "output-error")]
    OutputError,
}

/// Tool invocation made by the assistant, addressed by call id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    pub state: ToolState,
}

/// A typed fragment of message content. Order is the order of arrival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text { text: String, state: TextState },
    Reasoning { text: String, state: TextState },
    DynamicTool(ToolCallPart),
}

impl Part {
    pub fn text(text: impl Into<String>, state: TextState) -> Self {
        Part::Text {
            text: text.into(),
            state,
        }
    }

    pub fn reasoning(text: impl Into<String>, state: TextState) -> Self {
        Part::Reasoning {
            text: text.into(),
            state,
        }
    }

    pub fn tool_call(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Part::DynamicTool(ToolCallPart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input: None,
            output: None,
            error_text: None,
            state: ToolState::InputStreaming,
        })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Part::Text { .. })
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Part::Reasoning { .. })
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Part::DynamicTool(call) => Some(call),
            _ => None,
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    /// Still receiving content from the server
    #[serde(skip)]
    pub streaming: bool,
    #[serde(skip, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user message holding the question text
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            role: Role::User,
            parts: vec![Part::text(text, TextState::Done)],
            streaming: false,
            created_at: Utc::now(),
        }
    }

    /// Create an empty assistant message open for streaming
    pub fn assistant_placeholder() -> Self {
        Self {
            id: next_message_id(),
            role: Role::Assistant,
            parts: Vec::new(),
            streaming: true,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool call parts in order of appearance
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(Part::as_tool_call)
    }

    /// Copy of this message without reasoning parts
    pub fn without_reasoning(&self) -> Self {
        let mut message = self.clone();
        message.parts.retain(|part| !part.is_reasoning());
        message
    }
}
