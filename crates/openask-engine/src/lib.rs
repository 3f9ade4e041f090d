//! OpenAsk engine - streaming chat client for Ask AI backends
//!
//! This crate provides:
//! - HTTP transport for the session SSE and chunk-stream protocols
//! - Session lifecycle management
//! - Incremental stream framing (SSE events and `0:`-tagged lines)
//! - A pure message reducer that folds stream events into a transcript
//! - A single-flight chat orchestrator with optimistic append and rollback

pub mod config;
pub mod engine;
pub mod error;
pub mod framer;
mod http_client;
pub mod message;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod protocol;
pub mod reducer;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{DEFAULT_EMPTY_RESPONSE_TEXT, EngineConfig, Protocol};
pub use engine::{ChatEngine, ChatSnapshot, ExchangeOutcome, ExchangePhase};
pub use error::{ChatError, Result};
pub use message::{Message, Part, Role, TextState, ToolCallPart, ToolState};
pub use protocol::ChatEvent;
pub use session::SessionState;
pub use transport::{AskRequest, ChatTransport, HttpTransport, SessionInfo};
