//! Server-side session lifecycle (session protocol only)

use parking_lot::Mutex;

use crate::error::{ChatError, Result};
use crate::transport::ChatTransport;

/// Lifecycle state of the engine's session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    None,
    Creating,
    Active(String),
    Error(String),
}

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    // Bumped by `clear`; a create that finishes under a stale epoch is discarded.
    epoch: u64,
}

/// Puts `Creating` back to `None` if the create future is dropped before
/// it returns.
struct CreateGuard<'a> {
    inner: &'a Mutex<Inner>,
    epoch: u64,
    armed: bool,
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.epoch == self.epoch && inner.state == SessionState::Creating {
            inner.state = SessionState::None;
            tracing::debug!("Session create abandoned");
        }
    }
}

/// Owns the session id. Callers read it through [`SessionManager::session_id`]
/// and never write it directly.
#[derive(Debug, Default)]
pub struct SessionManager {
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        match &self.inner.lock().state {
            SessionState::Active(id) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn is_creating(&self) -> bool {
        matches!(self.inner.lock().state, SessionState::Creating)
    }

    /// Return the active session, creating one if there is none.
    ///
    /// Fails with [`ChatError::AlreadyCreating`] while another create is in
    /// flight.
    pub async fn initialize(&self, transport: &dyn ChatTransport) -> Result<String> {
        let epoch = {
            let mut inner = self.inner.lock();
            match &inner.state {
                SessionState::Active(id) => return Ok(id.clone()),
                SessionState::Creating => return Err(ChatError::AlreadyCreating),
                SessionState::None | SessionState::Error(_) => {}
            }
            inner.state = SessionState::Creating;
            inner.epoch
        };

        let mut guard = CreateGuard {
            inner: &self.inner,
            epoch,
            armed: true,
        };
        let created = transport.create_session().await;
        guard.armed = false;

        let stale = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                Some(created)
            } else {
                return match created {
                    Ok(info) => {
                        inner.state = SessionState::Active(info.session_id.clone());
                        Ok(info.session_id)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create session");
                        inner.state = SessionState::Error(e.to_string());
                        Err(e)
                    }
                };
            }
        };

        if let Some(Ok(info)) = stale {
            tracing::info!(session_id = %info.session_id, "Discarding session created after reset");
            if let Err(e) = transport.delete_session(&info.session_id).await {
                tracing::warn!(session_id = %info.session_id, error = %e, "Failed to delete discarded session");
            }
        }
        Err(ChatError::Cancelled)
    }

    /// Forget the session immediately, then delete it on the server.
    /// Delete failures are logged, never returned.
    pub async fn clear(&self, transport: &dyn ChatTransport) {
        let previous = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            std::mem::take(&mut inner.state)
        };

        if let SessionState::Active(session_id) = previous {
            if let Err(e) = transport.delete_session(&session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to delete session");
            }
        }
    }

    /// Take the active session id without contacting the server. Used by
    /// teardown paths that cannot await.
    pub(crate) fn take_active(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        match std::mem::take(&mut inner.state) {
            SessionState::Active(id) => Some(id),
            _ => None,
        }
    }
}
