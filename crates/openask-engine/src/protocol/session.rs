//! Session-protocol SSE events

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use super::ChatEvent;

/// Status reported for a server-side tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// SSE payloads, keyed by the frame's `event:` name.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Answer {
        text: String,
    },
    Tool {
        tool: String,
        call_id: String,
        status: ToolStatus,
    },
    Done,
    Error {
        error: String,
    },
}

#[derive(Deserialize)]
struct AnswerPayload {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ToolPayload {
    tool: String,
    #[serde(rename = "callID")]
    call_id: String,
    status: ToolStatus,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
}

impl SessionEvent {
    /// Parse a frame by event name. Unknown names and payloads that do not
    /// match their event yield `None`.
    pub fn parse(name: &str, data: Value) -> Option<Self> {
        let parsed = match name {
            "connected" => Ok(SessionEvent::Connected),
            "done" => Ok(SessionEvent::Done),
            "answer" => serde_json::from_value::<AnswerPayload>(data)
                .map(|p| SessionEvent::Answer { text: p.text }),
            "tool" => serde_json::from_value::<ToolPayload>(data).map(|p| SessionEvent::Tool {
                tool: p.tool,
                call_id: p.call_id,
                status: p.status,
            }),
            "error" => serde_json::from_value::<ErrorPayload>(data).map(|p| SessionEvent::Error {
                error: p.error.unwrap_or_else(|| "Unknown error".to_string()),
            }),
            other => {
                tracing::debug!(event = other, "Ignoring unknown SSE event");
                return None;
            }
        };

        match parsed {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(event = name, error = %e, "Ignoring SSE event with unexpected payload");
                None
            }
        }
    }
}

/// Translates session events into chat events for one exchange.
///
/// Answer deltas accumulate into the open text part. A tool event closes
/// that part so text arriving afterwards lands after the tool call.
#[derive(Debug, Default)]
pub struct SessionTranslator {
    text_open: bool,
    seen_calls: HashSet<String>,
}

impl SessionTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, name: &str, data: Value) -> Vec<ChatEvent> {
        match SessionEvent::parse(name, data) {
            Some(event) => self.apply(event),
            None => Vec::new(),
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        match event {
            SessionEvent::Connected => {
                tracing::debug!("SSE connected");
            }
            SessionEvent::Answer { text } => {
                if text.is_empty() {
                    return events;
                }
                if !self.text_open {
                    self.text_open = true;
                    events.push(ChatEvent::TextStart);
                }
                events.push(ChatEvent::TextDelta { delta: text });
            }
            SessionEvent::Tool {
                tool,
                call_id,
                status,
            } => {
                self.close_text(&mut events);
                if self.seen_calls.insert(call_id.clone()) {
                    events.push(ChatEvent::ToolInputStart {
                        tool_call_id: call_id.clone(),
                        tool_name: tool.clone(),
                    });
                }
                match status {
                    ToolStatus::Pending => {}
                    ToolStatus::Running => events.push(ChatEvent::ToolInputAvailable {
                        tool_call_id: call_id,
                        input: Value::Null,
                    }),
                    ToolStatus::Completed => events.push(ChatEvent::ToolOutputAvailable {
                        tool_call_id: call_id,
                        output: Value::Null,
                    }),
                    ToolStatus::Error => events.push(ChatEvent::ToolOutputError {
                        tool_call_id: call_id,
                        error_text: format!("tool {} failed", tool),
                    }),
                }
            }
            SessionEvent::Done => self.close_text(&mut events),
            SessionEvent::Error { error } => events.push(ChatEvent::Error { error_text: error }),
        }
        events
    }

    fn close_text(&mut self, events: &mut Vec<ChatEvent>) {
        if self.text_open {
            self.text_open = false;
            events.push(ChatEvent::TextEnd);
        }
    }
}
