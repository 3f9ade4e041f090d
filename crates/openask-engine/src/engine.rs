//! Chat orchestrator
//!
//! Drives one ask exchange end to end: optimistic append, session setup,
//! transport call, framing, reduction, then completion or rollback.
//!
//! Single-flight: starting an exchange cancels the previous one and bumps
//! the engine generation. Every transcript mutation happens under the
//! state lock after checking that the exchange's generation is still
//! current, so a superseded exchange can never touch the transcript again.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::framer::frame_stream;
use crate::message::{Message, Role};
use crate::protocol::{ChatEvent, EventDecoder};
use crate::reducer::{finalize, reduce};
use crate::session::{SessionManager, SessionState};
use crate::transport::{AskRequest, ChatTransport, HttpTransport};

/// Phase of the current (or last) exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Sending,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

/// How an exchange ended
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    /// Blank input, nothing sent
    Skipped,
    Completed,
    /// Superseded, reset, or shut down. Not an error.
    Cancelled,
    Errored(Arc<ChatError>),
}

impl ExchangeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExchangeOutcome::Completed)
    }

    pub fn error(&self) -> Option<&ChatError> {
        match self {
            ExchangeOutcome::Errored(e) => Some(e),
            _ => None,
        }
    }
}

/// Read-only view published to subscribers after every change
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    pub error: Option<Arc<ChatError>>,
    pub phase: Option<ExchangePhase>,
}

impl ChatSnapshot {
    /// The most recent assistant message, if any
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }
}

/// Compensation record for an optimistic append: the transcript length
/// before the entries went in.
#[derive(Debug, Clone, Copy)]
struct OptimisticAppend {
    base_len: usize,
}

impl OptimisticAppend {
    fn apply(messages: &mut Vec<Message>, entries: impl IntoIterator<Item = Message>) -> Self {
        let base_len = messages.len();
        messages.extend(entries);
        Self { base_len }
    }

    fn rollback(self, messages: &mut Vec<Message>) {
        messages.truncate(self.base_len);
    }
}

#[derive(Debug)]
struct ActiveExchange {
    generation: u64,
    cancel: CancellationToken,
    assistant_id: String,
}

/// Per-exchange state carried by the task running it
#[derive(Debug)]
struct Exchange {
    generation: u64,
    cancel: CancellationToken,
    assistant_id: String,
    append: OptimisticAppend,
    question: String,
    history: Vec<Message>,
}

/// Settles an exchange whose future is dropped before it finishes, so the
/// engine never keeps a dead exchange marked active.
struct SettleOnDrop<'a> {
    engine: &'a ChatEngine,
    generation: u64,
    cancel: CancellationToken,
    assistant_id: String,
    armed: bool,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();

        let mut state = self.engine.inner.state.lock();
        if state.generation == self.generation {
            state.close_cancelled(&self.assistant_id);
            self.engine.publish(&state);
        }
        tracing::debug!(generation = self.generation, "Exchange dropped before settling");
    }
}

#[derive(Debug, Default)]
struct EngineState {
    messages: Vec<Message>,
    generation: u64,
    active: Option<ActiveExchange>,
    is_streaming: bool,
    error: Option<Arc<ChatError>>,
    phase: Option<ExchangePhase>,
}

impl EngineState {
    fn owns(&self, exchange: &Exchange) -> bool {
        self.generation == exchange.generation && !exchange.cancel.is_cancelled()
    }

    fn assistant_index(&self, exchange: &Exchange) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.id == exchange.assistant_id)
    }

    /// Close a cancelled exchange that still owns the transcript. Its
    /// entries stay; only the placeholder stops streaming.
    fn close_cancelled(&mut self, assistant_id: &str) {
        if let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == assistant_id) {
            message.streaming = false;
        }
        self.active = None;
        self.is_streaming = false;
        self.phase = Some(ExchangePhase::Cancelled);
    }

    /// Cancel the in-flight exchange, if any, and close its placeholder.
    fn cancel_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.cancel.cancel();
        if let Some(message) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == active.assistant_id)
        {
            message.streaming = false;
        }
        tracing::debug!(generation = active.generation, "Cancelled in-flight exchange");
        true
    }
}

struct EngineInner {
    config: EngineConfig,
    transport: Arc<dyn ChatTransport>,
    sessions: SessionManager,
    state: Mutex<EngineState>,
    updates: watch::Sender<ChatSnapshot>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().active.take() {
            active.cancel.cancel();
        }

        let Some(session_id) = self.sessions.take_active() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = self.transport.clone();
                handle.spawn(async move {
                    if let Err(e) = transport.delete_session(&session_id).await {
                        tracing::warn!(session_id = %session_id, error = %e, "Failed to delete session on drop");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, "No runtime available, session left for server expiry");
            }
        }
    }
}

/// Streaming chat engine handle. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ChatEngine {
    inner: Arc<EngineInner>,
}

impl ChatEngine {
    /// Create an engine over the HTTP transport described by `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Create an engine over a custom transport
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let (updates, _) = watch::channel(ChatSnapshot::default());
        Self {
            inner: Arc::new(EngineInner {
                config,
                transport,
                sessions: SessionManager::new(),
                state: Mutex::new(EngineState::default()),
                updates,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Subscribe to transcript updates
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Current transcript, streaming flag and last error
    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.updates.borrow().clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.sessions.state()
    }

    /// Send `text` and drive the exchange to its end.
    pub async fn send_message(&self, text: impl Into<String>) -> ExchangeOutcome {
        match self.begin(text.into()) {
            Some(exchange) => self.drive(exchange).await,
            None => ExchangeOutcome::Skipped,
        }
    }

    /// Fire-and-forget send. The optimistic append happens before this
    /// returns; the rest runs on a spawned task.
    pub fn submit(&self, text: impl Into<String>) -> JoinHandle<ExchangeOutcome> {
        let exchange = self.begin(text.into());
        let engine = self.clone();
        tokio::spawn(async move {
            match exchange {
                Some(exchange) => engine.drive(exchange).await,
                None => ExchangeOutcome::Skipped,
            }
        })
    }

    /// Cancel any exchange, empty the transcript and tear down the session.
    pub async fn reset_chat(&self) {
        {
            let mut state = self.inner.state.lock();
            state.cancel_active();
            state.generation += 1;
            state.messages.clear();
            state.is_streaming = false;
            state.error = None;
            state.phase = None;
            self.publish(&state);
        }

        if self.inner.config.protocol.uses_session() {
            self.inner.sessions.clear(self.inner.transport.as_ref()).await;
        }
        tracing::info!("Chat reset");
    }

    /// Cancel any exchange and delete the session, best-effort.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.cancel_active() {
                state.phase = Some(ExchangePhase::Cancelled);
            }
            state.generation += 1;
            state.is_streaming = false;
            self.publish(&state);
        }
        self.inner.sessions.clear(self.inner.transport.as_ref()).await;
    }

    fn publish(&self, state: &EngineState) {
        let messages = if self.inner.config.expose_reasoning {
            state.messages.clone()
        } else {
            state
                .messages
                .iter()
                .map(Message::without_reasoning)
                .collect()
        };

        self.inner.updates.send_replace(ChatSnapshot {
            messages,
            is_streaming: state.is_streaming,
            error: state.error.clone(),
            phase: state.phase,
        });
    }

    fn begin(&self, text: String) -> Option<Exchange> {
        if text.trim().is_empty() {
            return None;
        }

        let mut state = self.inner.state.lock();
        state.cancel_active();
        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();

        let user = Message::user(text.clone());
        let placeholder = Message::assistant_placeholder();
        let assistant_id = placeholder.id.clone();

        let history = if self.inner.config.protocol.uses_session() {
            Vec::new()
        } else {
            state
                .messages
                .iter()
                .filter(|m| !(m.role == Role::Assistant && m.parts.is_empty()))
                .cloned()
                .chain(std::iter::once(user.clone()))
                .collect()
        };

        let append = OptimisticAppend::apply(&mut state.messages, [user, placeholder]);
        state.active = Some(ActiveExchange {
            generation,
            cancel: cancel.clone(),
            assistant_id: assistant_id.clone(),
        });
        state.is_streaming = true;
        state.error = None;
        state.phase = Some(ExchangePhase::Sending);
        self.publish(&state);

        tracing::debug!(generation, "Exchange started");
        Some(Exchange {
            generation,
            cancel,
            assistant_id,
            append,
            question: text,
            history,
        })
    }

    async fn drive(&self, mut exchange: Exchange) -> ExchangeOutcome {
        let mut guard = SettleOnDrop {
            engine: self,
            generation: exchange.generation,
            cancel: exchange.cancel.clone(),
            assistant_id: exchange.assistant_id.clone(),
            armed: true,
        };
        let result = self.run(&mut exchange).await;
        guard.armed = false;
        self.settle(exchange, result)
    }

    async fn run(&self, exchange: &mut Exchange) -> Result<()> {
        let protocol = self.inner.config.protocol;

        let session_id = if protocol.uses_session() {
            Some(self.ensure_session(&exchange.cancel).await?)
        } else {
            None
        };

        let request = AskRequest {
            session_id,
            question: exchange.question.clone(),
            messages: std::mem::take(&mut exchange.history),
        };
        let bytes = self
            .inner
            .transport
            .ask(request, exchange.cancel.clone())
            .await?;

        self.mutate(exchange, |state, _| {
            state.phase = Some(ExchangePhase::Streaming);
            Ok(())
        })?;

        let mut frames = frame_stream(bytes, protocol);
        let mut decoder = EventDecoder::new(protocol);
        while let Some(frame) = frames.next().await {
            for event in decoder.decode(frame?) {
                self.apply_event(exchange, &event)?;
            }
        }

        self.complete(exchange)
    }

    async fn ensure_session(&self, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        if let Some(session_id) = self.inner.sessions.session_id() {
            return Ok(session_id);
        }

        // Not raced against `cancel`: a superseded exchange still finishes
        // the create so the next one can reuse the session.
        let session_id = match self
            .inner
            .sessions
            .initialize(self.inner.transport.as_ref())
            .await
        {
            Ok(session_id) => session_id,
            Err(ChatError::AlreadyCreating) => return Err(ChatError::SessionBusy),
            Err(ChatError::Cancelled) => return Err(ChatError::Cancelled),
            Err(e) => return Err(ChatError::SessionCreateFailed(Box::new(e))),
        };

        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        Ok(session_id)
    }

    /// Run `f` against the state if this exchange still owns the transcript,
    /// then publish.
    fn mutate<T>(
        &self,
        exchange: &Exchange,
        f: impl FnOnce(&mut EngineState, usize) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock();
        if !state.owns(exchange) {
            return Err(ChatError::Cancelled);
        }
        let Some(index) = state.assistant_index(exchange) else {
            return Err(ChatError::Cancelled);
        };
        let value = f(&mut *state, index)?;
        self.publish(&state);
        Ok(value)
    }

    fn apply_event(&self, exchange: &Exchange, event: &ChatEvent) -> Result<()> {
        tracing::trace!(generation = exchange.generation, ?event, "Applying event");
        self.mutate(exchange, |state, index| {
            let next = reduce(state.messages[index].clone(), event)?;
            state.messages[index] = next;
            Ok(())
        })
    }

    fn complete(&self, exchange: &Exchange) -> Result<()> {
        let fallback = self.inner.config.empty_response_text.as_str();
        self.mutate(exchange, |state, index| {
            let message = finalize(state.messages[index].clone(), fallback);
            state.messages[index] = message;
            state.active = None;
            state.is_streaming = false;
            state.phase = Some(ExchangePhase::Completed);
            Ok(())
        })
    }

    fn settle(&self, exchange: Exchange, result: Result<()>) -> ExchangeOutcome {
        let err = match result {
            Ok(()) => {
                tracing::info!(generation = exchange.generation, "Exchange completed");
                return ExchangeOutcome::Completed;
            }
            Err(err) => err,
        };

        let mut state = self.inner.state.lock();
        if state.generation != exchange.generation {
            tracing::debug!(generation = exchange.generation, "Superseded exchange stopped");
            return ExchangeOutcome::Cancelled;
        }

        if err.is_cancelled() || exchange.cancel.is_cancelled() {
            state.close_cancelled(&exchange.assistant_id);
            self.publish(&state);
            tracing::debug!(generation = exchange.generation, "Exchange cancelled");
            return ExchangeOutcome::Cancelled;
        }

        tracing::error!(
            generation = exchange.generation,
            status = ?err.status(),
            error = %err,
            "Exchange failed, rolling back"
        );
        let err = Arc::new(err);
        exchange.append.rollback(&mut state.messages);
        state.active = None;
        state.is_streaming = false;
        state.error = Some(err.clone());
        state.phase = Some(ExchangePhase::Errored);
        self.publish(&state);
        ExchangeOutcome::Errored(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::message::{Part, TextState, ToolState};
    use crate::mock::{MockReply, MockTransport};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn engine(protocol: Protocol) -> (ChatEngine, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let config = EngineConfig::new("http://localhost:3000", protocol)
            .with_empty_response_text("No answer.");
        (
            ChatEngine::with_transport(config, transport.clone()),
            transport,
        )
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ChatSnapshot>,
        predicate: impl FnMut(&ChatSnapshot) -> bool,
    ) -> ChatSnapshot {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("engine dropped")
            .clone()
    }

    const CHUNKS: [&str; 3] = [
        "0:{\"type\":\"text-start\",\"id\":\"t\"}\n0:{\"type\":\"text-del",
        "ta\",\"id\":\"t\",\"delta\":\"Hello\"}\n0:{\"type\":\"text-delta\",\"delta\":\" there\"}\n",
        "0:{\"type\":\"text-end\",\"id\":\"t\"}\n",
    ];

    #[tokio::test]
    async fn test_chunk_stream_exchange_completes() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        transport.push_reply(MockReply::body(CHUNKS));

        let outcome = engine.send_message("Hi").await;
        assert!(outcome.is_completed());

        let snapshot = engine.snapshot();
        assert!(!snapshot.is_streaming);
        assert_eq!(snapshot.phase, Some(ExchangePhase::Completed));
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].role, Role::User);
        let answer = &snapshot.messages[1];
        assert!(!answer.streaming);
        assert_eq!(answer.parts, vec![Part::text("Hello there", TextState::Done)]);

        let asks = transport.asks();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].session_id, None);
        assert_eq!(asks[0].messages.len(), 1);
        assert_eq!(asks[0].messages[0].text(), "Hi");
    }

    #[tokio::test]
    async fn test_chunk_stream_sends_prior_transcript() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        transport.push_reply(MockReply::body(CHUNKS));
        transport.push_reply(MockReply::body(CHUNKS));

        engine.send_message("first").await;
        engine.send_message("second").await;

        let asks = transport.asks();
        let texts: Vec<String> = asks[1].messages.iter().map(Message::text).collect();
        assert_eq!(texts, vec!["first", "Hello there", "second"]);
    }

    #[tokio::test]
    async fn test_session_exchange_reuses_session() {
        let (engine, transport) = engine(Protocol::Session);
        let body = "event: connected\ndata: {\"type\":\"connected\"}\n\n\
event: answer\ndata: {\"type\":\"answer\",\"text\":\"Use \",\"sessionId\":\"session-1\"}\n\n\
event: tool\ndata: {\"type\":\"tool\",\"tool\":\"search_docs\",\"callID\":\"c1\",\"status\":\"completed\",\"sessionId\":\"session-1\"}\n\n\
event: answer\ndata: {\"type\":\"answer\",\"text\":\"cargo.\",\"sessionId\":\"session-1\"}\n\n\
event: done\ndata: {\"type\":\"done\"}\n\n";
        transport.push_reply(MockReply::body([body]));
        transport.push_reply(MockReply::body([body]));

        assert!(engine.send_message("How do I build?").await.is_completed());
        assert!(engine.send_message("And test?").await.is_completed());

        assert_eq!(transport.created_sessions(), 1);
        let asks = transport.asks();
        assert_eq!(asks[0].session_id.as_deref(), Some("session-1"));
        assert_eq!(asks[1].session_id.as_deref(), Some("session-1"));
        assert_eq!(asks[1].question, "And test?");

        let snapshot = engine.snapshot();
        let answer = snapshot.last_assistant().unwrap();
        assert_eq!(answer.text(), "Use cargo.");
        assert_eq!(answer.parts.len(), 3);
        let call = answer.parts[1].as_tool_call().unwrap();
        assert_eq!(call.tool_name, "search_docs");
        assert_eq!(call.state, ToolState::OutputAvailable);
    }

    #[tokio::test]
    async fn test_empty_answer_uses_fallback() {
        let (engine, transport) = engine(Protocol::Session);
        transport.push_reply(MockReply::body(["event: done\ndata: {\"type\":\"done\"}\n\n"]));

        assert!(engine.send_message("?").await.is_completed());
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.last_assistant().unwrap().text(), "No answer.");
    }

    #[tokio::test]
    async fn test_blank_input_is_skipped() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        assert!(matches!(
            engine.send_message("   \n").await,
            ExchangeOutcome::Skipped
        ));
        assert!(engine.snapshot().messages.is_empty());
        assert!(transport.asks().is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_rolls_back() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        transport.push_reply(MockReply::body(CHUNKS));
        engine.send_message("first").await;
        let before = engine.snapshot().messages;

        transport.push_reply(MockReply::Reads(vec![
            Ok(bytes::Bytes::from_static(
                b"0:{\"type\":\"text-start\"}\n0:{\"type\":\"text-delta\",\"delta\":\"par\"}\n",
            )),
            Err(ChatError::Transport {
                status: 502,
                reason: "Bad Gateway".to_string(),
            }),
        ]));
        let outcome = engine.send_message("second").await;

        assert_eq!(outcome.error().and_then(ChatError::status), Some(502));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.messages, before);
        assert!(!snapshot.is_streaming);
        assert_eq!(snapshot.phase, Some(ExchangePhase::Errored));
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn test_http_error_and_missing_body_roll_back() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        transport.push_reply(MockReply::Status(500));
        transport.push_reply(MockReply::NoBody);

        let outcome = engine.send_message("one").await;
        assert_eq!(outcome.error().and_then(ChatError::status), Some(500));
        assert!(engine.snapshot().messages.is_empty());

        let outcome = engine.send_message("two").await;
        assert!(matches!(outcome.error(), Some(ChatError::NoResponseBody)));
        assert!(engine.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_event_terminates_exchange() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        transport.push_reply(MockReply::body([
            "0:{\"type\":\"text-start\"}\n",
            "0:{\"type\":\"error\",\"errorText\":\"model overloaded\"}\n",
            "0:{\"type\":\"text-delta\",\"delta\":\"never\"}\n",
        ]));

        let outcome = engine.send_message("hi").await;
        assert!(matches!(
            outcome.error(),
            Some(ChatError::Stream(text)) if text == "model overloaded"
        ));
        assert!(engine.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_second_send_supersedes_first() {
        let (engine, transport) = engine(Protocol::ChunkStream);
        let mut rx = engine.subscribe();
        let first_stream = transport.push_live();
        let second_stream = transport.push_live();

        let first = engine.submit("first");
        first_stream.send("0:{\"type\":\"text-start\"}\n0:{\"type\":\"text-delta\",\"delta\":\"one\"}\n");
        let seen = wait_for(&mut rx, |s| {
            s.messages.get(1).map(Message::text).as_deref() == Some("one")
        })
        .await;
        let first_placeholder = seen.messages[1].clone();

        let second = engine.submit("second");
        assert!(matches!(first.await.unwrap(), ExchangeOutcome::Cancelled));

        // Late events for the superseded exchange are never applied.
        first_stream.send("0:{\"type\":\"text-delta\",\"delta\":\" more\"}\n");
        first_stream.close();

        second_stream.send("0:{\"type\":\"text-start\"}\n0:{\"type\":\"text-delta\",\"delta\":\"two\"}\n");
        second_stream.close();
        assert!(second.await.unwrap().is_completed());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.messages.len(), 4);
        assert_eq!(snapshot.messages[1].parts, first_placeholder.parts);
        assert!(!snapshot.messages[1].streaming);
        assert_eq!(snapshot.messages[3].text(), "two");
        assert!(!snapshot.is_streaming);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_reset_mid_stream() {
        let (engine, transport) = engine(Protocol::Session);
        let mut rx = engine.subscribe();
        let stream = transport.push_live();

        let exchange = engine.submit("question");
        stream.send("event: answer\ndata: {\"type\":\"answer\",\"text\":\"partial\"}\n\n");
        wait_for(&mut rx, |s| {
            s.last_assistant().map(Message::text).as_deref() == Some("partial")
        })
        .await;

        engine.reset_chat().await;
        assert!(matches!(exchange.await.unwrap(), ExchangeOutcome::Cancelled));

        let snapshot = engine.snapshot();
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.is_streaming);
        assert!(snapshot.error.is_none());
        assert_eq!(transport.deleted_sessions(), vec!["session-1".to_string()]);
        assert_eq!(engine.session_state(), SessionState::None);

        // Late events after reset are ignored.
        stream.send("event: answer\ndata: {\"type\":\"answer\",\"text\":\"late\"}\n\n");
        tokio::task::yield_now().await;
        assert!(engine.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_session_busy_while_creating() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MockTransport::new().with_create_gate(gate.clone()));
        let engine = ChatEngine::with_transport(
            EngineConfig::new("http://localhost:3000", Protocol::Session),
            transport.clone(),
        );

        let first = engine.submit("first");
        while !matches!(engine.session_state(), SessionState::Creating) {
            tokio::task::yield_now().await;
        }

        let outcome = engine.send_message("second").await;
        assert!(matches!(outcome.error(), Some(ChatError::SessionBusy)));

        gate.notify_one();
        assert!(matches!(first.await.unwrap(), ExchangeOutcome::Cancelled));

        // The busy exchange rolled back its own entries only.
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].text(), "first");
    }

    #[tokio::test]
    async fn test_dropped_send_during_create_recovers() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MockTransport::new().with_create_gate(gate.clone()));
        let engine = ChatEngine::with_transport(
            EngineConfig::new("http://localhost:3000", Protocol::Session),
            transport.clone(),
        );

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), engine.send_message("first")).await;
        assert!(timed_out.is_err());

        assert_eq!(engine.session_state(), SessionState::None);
        let snapshot = engine.snapshot();
        assert!(!snapshot.is_streaming);
        assert_eq!(snapshot.phase, Some(ExchangePhase::Cancelled));
        assert!(!snapshot.messages[1].streaming);

        gate.notify_one();
        transport.push_reply(MockReply::body(["event: answer\ndata: {\"text\":\"ok\"}\n\n"]));
        let outcome = engine.send_message("retry").await;
        assert!(outcome.is_completed(), "unexpected outcome: {:?}", outcome);
        assert_eq!(engine.snapshot().last_assistant().unwrap().text(), "ok");
    }

    #[tokio::test]
    async fn test_dropping_engine_deletes_session() {
        let (engine, transport) = engine(Protocol::Session);
        transport.push_reply(MockReply::body(["event: done\ndata: {\"type\":\"done\"}\n\n"]));
        assert!(engine.send_message("hi").await.is_completed());
        let observer = engine.clone();

        drop(engine);
        tokio::task::yield_now().await;
        assert!(transport.deleted_sessions().is_empty());

        drop(observer);
        for _ in 0..10 {
            if !transport.deleted_sessions().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.deleted_sessions(), vec!["session-1".to_string()]);
        assert_eq!(transport.created_sessions(), 1);
    }

    #[tokio::test]
    async fn test_session_create_failure() {
        let (engine, transport) = engine(Protocol::Session);
        transport.fail_session_create(503);

        let outcome = engine.send_message("hello").await;
        let err = outcome.error().unwrap();
        assert!(matches!(err, ChatError::SessionCreateFailed(_)));
        assert_eq!(err.status(), Some(503));
        assert!(engine.snapshot().messages.is_empty());
        assert!(transport.asks().is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_hidden_unless_exposed() {
        let body = [
            "0:{\"type\":\"reasoning-start\"}\n0:{\"type\":\"reasoning-delta\",\"delta\":\"think\"}\n",
            "0:{\"type\":\"reasoning-end\"}\n0:{\"type\":\"text-start\"}\n0:{\"type\":\"text-delta\",\"delta\":\"ok\"}\n",
        ];

        let (hidden, transport) = engine(Protocol::ChunkStream);
        transport.push_reply(MockReply::body(body));
        hidden.send_message("q").await;
        let answer = hidden.snapshot().messages[1].clone();
        assert_eq!(answer.parts, vec![Part::text("ok", TextState::Done)]);

        let transport = Arc::new(MockTransport::new());
        transport.push_reply(MockReply::body(body));
        let exposed = ChatEngine::with_transport(
            EngineConfig::new("http://localhost:3000", Protocol::ChunkStream).with_reasoning(true),
            transport,
        );
        exposed.send_message("q").await;
        let answer = exposed.snapshot().messages[1].clone();
        assert_eq!(answer.parts[0], Part::reasoning("think", TextState::Done));
    }

    #[tokio::test]
    async fn test_shutdown_deletes_session() {
        let (engine, transport) = engine(Protocol::Session);
        transport.push_reply(MockReply::body(["event: done\ndata: {\"type\":\"done\"}\n\n"]));
        engine.send_message("hi").await;

        engine.shutdown().await;
        assert_eq!(transport.deleted_sessions(), vec!["session-1".to_string()]);
        assert_eq!(engine.session_state(), SessionState::None);
    }
}
