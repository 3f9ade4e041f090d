//! Protocol decoding: frames in, typed chat events out.
//!
//! Chunk-stream payloads already use the event vocabulary and deserialize
//! directly. Session-protocol SSE events are translated by
//! [`SessionTranslator`], which tracks just enough per-exchange state to
//! preserve the order in which content arrived.

mod session;

pub use session::{SessionEvent, SessionTranslator, ToolStatus};

use serde::Deserialize;
use serde_json::Value;

use crate::config::Protocol;
use crate::framer::Frame;

/// Typed stream event consumed by the reducer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    TextStart,
    TextDelta {
        delta: String,
    },
    TextEnd,
    ReasoningStart,
    ReasoningDelta {
        delta: String,
    },
    ReasoningEnd,
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        #[serde(default)]
        input: Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        #[serde(default)]
        output: Value,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    Error {
        error_text: String,
    },
    #[serde(other)]
    Unknown,
}

impl ChatEvent {
    /// Decode a chunk payload. Payloads that do not fit any known shape
    /// become [`ChatEvent::Unknown`].
    pub fn from_chunk(payload: Value) -> Self {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>")
            .to_string();
        match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(kind = %kind, error = %e, "Ignoring undecodable chunk");
                ChatEvent::Unknown
            }
        }
    }
}

/// Per-exchange decoder from frames to chat events.
#[derive(Debug)]
pub enum EventDecoder {
    Session(SessionTranslator),
    ChunkStream,
}

impl EventDecoder {
    pub fn new(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Session => EventDecoder::Session(SessionTranslator::new()),
            Protocol::ChunkStream => EventDecoder::ChunkStream,
        }
    }

    pub fn decode(&mut self, frame: Frame) -> Vec<ChatEvent> {
        match (self, frame) {
            (EventDecoder::Session(translator), Frame::Event { name, data }) => {
                translator.translate(&name, data)
            }
            (EventDecoder::ChunkStream, Frame::Chunk(payload)) => {
                vec![ChatEvent::from_chunk(payload)]
            }
            (_, frame) => {
                tracing::debug!(?frame, "Frame does not match the configured protocol");
                Vec::new()
            }
        }
    }
}
