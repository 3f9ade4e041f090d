//! HTTP transport
//!
//! The transport only issues requests and hands back the raw response
//! body; it owns no conversation state.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{EngineConfig, Protocol};
use crate::error::{ChatError, Result};
use crate::http_client::build_http_client;
use crate::message::Message;

// Error bodies are echoed into the error message; keep them short.
const MAX_ERROR_BODY: usize = 512;

/// Raw response body, read incrementally.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Server-issued session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// One question to send
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    /// Active session (session protocol only)
    pub session_id: Option<String>,
    /// The user's question
    pub question: String,
    /// Prior transcript including the new user message (chunk-stream protocol only)
    pub messages: Vec<Message>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionAskBody<'a> {
    session_id: &'a str,
    question: &'a str,
}

#[derive(Serialize)]
struct ChunkAskBody<'a> {
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<&'a str>,
}

/// Transport contract used by the engine
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Create a server-side session
    async fn create_session(&self) -> Result<SessionInfo>;

    /// Delete a server-side session
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Send a question and return the streamed response body.
    ///
    /// Triggering `cancel` resolves a pending request, or the next read,
    /// with [`ChatError::Cancelled`].
    async fn ask(&self, request: AskRequest, cancel: CancellationToken) -> Result<ByteStream>;
}

/// reqwest-backed transport for both wire protocols
pub struct HttpTransport {
    client: Client,
    protocol: Protocol,
    api_url: Url,
    project_id: Option<String>,
}

impl HttpTransport {
    /// Create a transport from engine configuration
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let client = build_http_client(config.request_timeout_secs)?;
        Self::with_client(client, config)
    }

    /// Create a transport that reuses an existing HTTP client
    pub fn with_client(client: Client, config: &EngineConfig) -> Result<Self> {
        let api_url = Url::parse(config.api_url.trim())
            .map_err(|e| ChatError::InvalidConfig(format!("api_url: {}", e)))?;
        Ok(Self {
            client,
            protocol: config.protocol,
            api_url,
            project_id: config.project_id.clone(),
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// `{base}/api[/projects/:id]/<segments>`
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ChatError::InvalidConfig(format!("api_url '{}' cannot be a base", self.api_url))
            })?;
            path.pop_if_empty().push("api");
            if let Some(project) = &self.project_id {
                path.push("projects").push(project);
            }
            path.extend(segments);
        }
        Ok(url)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn create_session(&self) -> Result<SessionInfo> {
        let response = self
            .client
            .post(self.endpoint(&["session"])?)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body = response.bytes().await?;
        let info: SessionInfo = serde_json::from_slice(&body)?;
        tracing::info!(
            session_id = %info.session_id,
            expires_in = ?info.expires_in,
            "Session created"
        );
        Ok(info)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&["session", session_id])?)
            .send()
            .await?;
        ensure_success(response).await?;
        tracing::info!(session_id, "Session deleted");
        Ok(())
    }

    async fn ask(&self, request: AskRequest, cancel: CancellationToken) -> Result<ByteStream> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let builder = match self.protocol {
            Protocol::Session => {
                let session_id = request.session_id.as_deref().ok_or_else(|| {
                    ChatError::InvalidConfig("session protocol requires a session id".to_string())
                })?;
                self.client
                    .post(self.endpoint(&["ask"])?)
                    .json(&SessionAskBody {
                        session_id,
                        question: &request.question,
                    })
            }
            Protocol::ChunkStream => self.client.post(self.api_url.clone()).json(&ChunkAskBody {
                messages: &request.messages,
                project: self.project_id.as_deref(),
            }),
        };

        // The error body read is raced too, so a slow failure cannot delay
        // cancellation.
        let send = send_checked(builder.header(ACCEPT, "text/event-stream"));
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            response = send => response?,
        };

        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(ChatError::NoResponseBody);
        }

        tracing::debug!(protocol = %self.protocol, status = response.status().as_u16(), "Streaming response");
        Ok(cancellable(response.bytes_stream(), cancel))
    }
}

async fn send_checked(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await?;
    ensure_success(response).await
}

/// Map a non-success response to [`ChatError::Transport`].
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let mut reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    let body = body.trim();
    if !body.is_empty() {
        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        reason.push_str(": ");
        reason.push_str(&snippet);
        if snippet.len() < body.len() {
            reason.push_str("... [truncated]");
        }
    }

    Err(ChatError::Transport {
        status: status.as_u16(),
        reason,
    })
}

/// Race every read against `cancel`. Once triggered, the stream yields a
/// single `Cancelled` and drops the underlying body, aborting the request.
pub fn cancellable<S, E>(stream: S, cancel: CancellationToken) -> ByteStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let mut stream = Box::pin(stream);
    Box::pin(async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = stream.next() => Some(chunk),
            };

            match next {
                None => {
                    yield Err(ChatError::Cancelled);
                    return;
                }
                Some(Some(Ok(bytes))) => yield Ok(bytes),
                Some(Some(Err(e))) => {
                    yield Err(e.into());
                    return;
                }
                Some(None) => return,
            }
        }
    })
}
