//! Message reducer
//!
//! `reduce` folds one chat event into the in-flight assistant message.
//! It is pure: the message goes in by value and the next state comes out.
//! Delta and end events address the *last* part of their kind, scanning
//! from the end, so a tool call opened mid-text never absorbs text.

use crate::error::{ChatError, Result};
use crate::message::{Message, Part, TextState, ToolCallPart, ToolState};
use crate::protocol::ChatEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Text,
    Reasoning,
}

impl StreamKind {
    fn open(self) -> Part {
        match self {
            StreamKind::Text => Part::text(String::new(), TextState::Streaming),
            StreamKind::Reasoning => Part::reasoning(String::new(), TextState::Streaming),
        }
    }
}

fn last_of_kind(parts: &mut [Part], kind: StreamKind) -> Option<(&mut String, &mut TextState)> {
    parts.iter_mut().rev().find_map(|part| match (part, kind) {
        (Part::Text { text, state }, StreamKind::Text) => Some((text, state)),
        (Part::Reasoning { text, state }, StreamKind::Reasoning) => Some((text, state)),
        _ => None,
    })
}

fn tool_call_mut<'a>(parts: &'a mut [Part], tool_call_id: &str) -> Option<&'a mut ToolCallPart> {
    parts.iter_mut().find_map(|part| match part {
        Part::DynamicTool(call) if call.tool_call_id == tool_call_id => Some(call),
        _ => None,
    })
}

fn start(message: &mut Message, kind: StreamKind) {
    // Only one part per kind may stream at a time.
    if let Some((_, state)) = last_of_kind(&mut message.parts, kind) {
        *state = TextState::Done;
    }
    message.parts.push(kind.open());
}

fn delta(message: &mut Message, kind: StreamKind, delta: &str) {
    if let Some((text, _)) = last_of_kind(&mut message.parts, kind) {
        text.push_str(delta);
    }
}

fn end(message: &mut Message, kind: StreamKind) {
    if let Some((_, state)) = last_of_kind(&mut message.parts, kind) {
        *state = TextState::Done;
    }
}

/// Apply one event. An `error` event is returned as `ChatError::Stream`
/// and leaves the message untouched.
pub fn reduce(mut message: Message, event: &ChatEvent) -> Result<Message> {
    match event {
        ChatEvent::TextStart => start(&mut message, StreamKind::Text),
        ChatEvent::TextDelta { delta: d } => delta(&mut message, StreamKind::Text, d),
        ChatEvent::TextEnd => end(&mut message, StreamKind::Text),
        ChatEvent::ReasoningStart => start(&mut message, StreamKind::Reasoning),
        ChatEvent::ReasoningDelta { delta: d } => delta(&mut message, StreamKind::Reasoning, d),
        ChatEvent::ReasoningEnd => end(&mut message, StreamKind::Reasoning),
        ChatEvent::ToolInputStart {
            tool_call_id,
            tool_name,
        } => match tool_call_mut(&mut message.parts, tool_call_id) {
            Some(call) => call.tool_name = tool_name.clone(),
            None => message
                .parts
                .push(Part::tool_call(tool_call_id.clone(), tool_name.clone())),
        },
        ChatEvent::ToolInputAvailable {
            tool_call_id,
            input,
        } => {
            if let Some(call) = tool_call_mut(&mut message.parts, tool_call_id) {
                call.input = Some(input.clone());
                call.state = ToolState::InputAvailable;
            }
        }
        ChatEvent::ToolOutputAvailable {
            tool_call_id,
            output,
        } => {
            if let Some(call) = tool_call_mut(&mut message.parts, tool_call_id) {
                call.output = Some(output.clone());
                call.state = ToolState::OutputAvailable;
            }
        }
        ChatEvent::ToolOutputError {
            tool_call_id,
            error_text,
        } => {
            if let Some(call) = tool_call_mut(&mut message.parts, tool_call_id) {
                call.error_text = Some(error_text.clone());
                call.state = ToolState::OutputError;
            }
        }
        ChatEvent::Error { error_text } => return Err(ChatError::Stream(error_text.clone())),
        ChatEvent::Unknown => {}
    }
    Ok(message)
}

/// Close a completed message: settle streaming parts and substitute
/// `fallback` when no visible text arrived.
pub fn finalize(mut message: Message, fallback: &str) -> Message {
    for part in &mut message.parts {
        match part {
            Part::Text { state, .. } | Part::Reasoning { state, .. } => *state = TextState::Done,
            Part::DynamicTool(_) => {}
        }
    }
    message.streaming = false;

    if message.text().trim().is_empty() {
        match last_of_kind(&mut message.parts, StreamKind::Text) {
            Some((text, _)) => *text = fallback.to_string(),
            None => message.parts.push(Part::text(fallback, TextState::Done)),
        }
    }
    message
}
