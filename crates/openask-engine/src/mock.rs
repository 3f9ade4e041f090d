//! Scripted in-memory transport for engine tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};
use crate::transport::{AskRequest, ByteStream, ChatTransport, SessionInfo, cancellable};

/// Scripted reply to one `ask` call.
pub enum MockReply {
    /// Body delivered as the given reads, in order.
    Reads(Vec<Result<Bytes>>),
    /// Body fed live through a [`MockStreamHandle`].
    Live(mpsc::UnboundedReceiver<Result<Bytes>>),
    /// `ask` fails with an HTTP status.
    Status(u16),
    /// `ask` succeeds but there is no body.
    NoBody,
}

impl MockReply {
    /// Body delivered in one read per fragment.
    pub fn body<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockReply::Reads(
            fragments
                .into_iter()
                .map(|s| Ok(Bytes::from(s.into())))
                .collect(),
        )
    }

    /// A live body plus the handle that drives it.
    pub fn live() -> (Self, MockStreamHandle) {
        let (tx, rx) = mpsc::unbounded();
        (MockReply::Live(rx), MockStreamHandle { tx })
    }
}

/// Feeds a live mock body.
#[derive(Clone)]
pub struct MockStreamHandle {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl MockStreamHandle {
    /// Deliver one read. Returns false once the reader is gone.
    pub fn send(&self, fragment: impl Into<String>) -> bool {
        self.tx
            .unbounded_send(Ok(Bytes::from(fragment.into())))
            .is_ok()
    }

    /// Fail the body with `error`.
    pub fn fail(&self, error: ChatError) -> bool {
        self.tx.unbounded_send(Err(error)).is_ok()
    }

    /// End the body.
    pub fn close(&self) {
        self.tx.close_channel();
    }
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    asks: Vec<AskRequest>,
    next_session: u64,
    created: usize,
    deleted: Vec<String>,
    create_failure: Option<u16>,
    delete_failure: Option<u16>,
}

/// Deterministic transport driven by scripted replies.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    create_gate: Option<Arc<Notify>>,
}

fn status_error(status: u16) -> ChatError {
    ChatError::Transport {
        status,
        reason: format!("mock status {}", status),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `create_session` until the gate is notified.
    pub fn with_create_gate(mut self, gate: Arc<Notify>) -> Self {
        self.create_gate = Some(gate);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Queue a live reply and return its handle.
    pub fn push_live(&self) -> MockStreamHandle {
        let (reply, handle) = MockReply::live();
        self.push_reply(reply);
        handle
    }

    pub fn fail_session_create(&self, status: u16) {
        self.state.lock().create_failure = Some(status);
    }

    pub fn allow_session_create(&self) {
        self.state.lock().create_failure = None;
    }

    pub fn fail_session_delete(&self, status: u16) {
        self.state.lock().delete_failure = Some(status);
    }

    pub fn created_sessions(&self) -> usize {
        self.state.lock().created
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Requests received so far.
    pub fn asks(&self) -> Vec<AskRequest> {
        self.state.lock().asks.clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn create_session(&self) -> Result<SessionInfo> {
        if let Some(gate) = &self.create_gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if let Some(status) = state.create_failure {
            return Err(status_error(status));
        }
        state.next_session += 1;
        state.created += 1;
        Ok(SessionInfo {
            session_id: format!("session-{}", state.next_session),
            expires_in: Some(3600),
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.deleted.push(session_id.to_string());
        match state.delete_failure {
            Some(status) => Err(status_error(status)),
            None => Ok(()),
        }
    }

    async fn ask(&self, request: AskRequest, cancel: CancellationToken) -> Result<ByteStream> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let reply = {
            let mut state = self.state.lock();
            state.asks.push(request);
            state
                .replies
                .pop_front()
                .unwrap_or_else(|| MockReply::Reads(Vec::new()))
        };

        match reply {
            MockReply::Reads(reads) => Ok(cancellable(futures::stream::iter(reads), cancel)),
            MockReply::Live(rx) => Ok(cancellable(rx, cancel)),
            MockReply::Status(status) => Err(status_error(status)),
            MockReply::NoBody => Err(ChatError::NoResponseBody),
        }
    }
}
