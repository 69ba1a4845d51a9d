//! Per-channel session state.
//!
//! A [`Session`] is the binding between one channel and one multi-turn
//! conversation with the engine. All mutable state lives behind a single
//! mutex so input admission and turn-completion handoff observe it
//! atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::sink::{EventSink, SessionEvent};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Being created; transient within `start_session`.
    Starting,
    /// A turn is in flight.
    RunningTurn,
    /// Waiting for user input.
    Idle,
    /// Ended; the session is (being) removed and emits nothing further.
    Ended,
}

/// Outcome of submitting a message to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The session was idle; a new turn started with the message.
    Accepted,
    /// A turn is running; the message replaced any previously queued one.
    Queued,
    /// No session exists for the channel.
    NoSession,
}

/// Read-only projection of a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub started_at: DateTime<Utc>,
    pub message_count: u64,
    pub cwd: PathBuf,
    pub waiting_for_input: bool,
}

/// Mutable session state, guarded by the session mutex.
pub(crate) struct SessionInner {
    pub state: SessionState,
    /// Engine resumption handle; first-write-wins for the session's lifetime.
    pub resume_token: Option<String>,
    /// At most one buffered message; last writer wins.
    pub pending_input: Option<String>,
    /// Incremented once per started turn.
    pub message_count: u64,
    /// Cancellation handle for the in-flight turn, present exactly while one
    /// is running.
    pub turn_cancel: Option<CancellationToken>,
}

/// One conversation bound to one channel.
pub struct Session {
    channel_id: String,
    cwd: PathBuf,
    started_at: DateTime<Utc>,
    sink: Arc<dyn EventSink>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub(crate) fn new(channel_id: impl Into<String>, cwd: PathBuf, sink: Arc<dyn EventSink>) -> Self {
        Self {
            channel_id: channel_id.into(),
            cwd,
            started_at: Utc::now(),
            sink,
            inner: Mutex::new(SessionInner {
                state: SessionState::Starting,
                resume_token: None,
                pending_input: None,
                message_count: 0,
                turn_cancel: None,
            }),
        }
    }

    /// Set the state before the session is shared. Callers must do this
    /// prior to inserting the session into the registry map.
    pub(crate) fn set_initial_state(&mut self, state: SessionState) {
        self.inner.get_mut().state = state;
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    /// Whether the session still accepts and emits anything.
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state != SessionState::Ended
    }

    /// Record the engine's resumption handle. The first value sticks; later
    /// values (even differing ones) are ignored.
    pub(crate) async fn set_resume_token_if_unset(&self, token: &str) {
        let mut inner = self.inner.lock().await;
        match &inner.resume_token {
            None => {
                tracing::debug!(channel = %self.channel_id, "Captured engine resume token");
                inner.resume_token = Some(token.to_string());
            }
            Some(existing) if existing != token => {
                tracing::debug!(
                    channel = %self.channel_id,
                    "Ignoring changed resume token mid-session"
                );
            }
            Some(_) => {}
        }
    }

    /// Snapshot for `session_info`.
    pub async fn info(&self) -> SessionInfo {
        let inner = self.inner.lock().await;
        SessionInfo {
            started_at: self.started_at,
            message_count: inner.message_count,
            cwd: self.cwd.clone(),
            waiting_for_input: inner.state == SessionState::Idle,
        }
    }

    /// Deliver an event only if the session has not been ended.
    ///
    /// A removed session must not surface late output from a still-draining
    /// engine stream.
    pub(crate) async fn deliver_if_active(&self, event: SessionEvent) {
        if !self.is_active().await {
            tracing::debug!(channel = %self.channel_id, "Dropping event for ended session");
            return;
        }
        self.deliver(event).await;
    }

    /// Deliver an event to the session's sink, logging failures.
    ///
    /// Delivery failures never roll back sequencer state.
    pub(crate) async fn deliver(&self, event: SessionEvent) {
        if let Err(e) = self.sink.deliver(event).await {
            tracing::warn!(channel = %self.channel_id, "Event delivery failed: {}", e);
        }
    }
}
