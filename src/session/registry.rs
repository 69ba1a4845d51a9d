//! Session registry and turn sequencer.
//!
//! Owns the per-channel map of sessions, enforces one live session per
//! channel, admits or queues incoming messages relative to the in-flight
//! turn, and performs the turn-completion handoff.
//!
//! All decisions about a given session are made under that session's state
//! mutex, so a message racing a completion is observed by exactly one of the
//! two paths: queued into the pending slot before the handoff check, or
//! accepted as a fresh turn after it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{AgentConfig, TurnConfig};
use crate::engine::EngineClient;
use crate::error::SessionError;
use crate::session::session::{SendOutcome, Session, SessionInfo, SessionState};
use crate::session::turn;
use crate::sink::{EventSink, SessionEvent};

/// Registry of live sessions, one per channel.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    engine: Arc<dyn EngineClient>,
    agent: AgentConfig,
    turn: TurnConfig,
}

impl SessionRegistry {
    /// Create a registry around an engine client.
    pub fn new(engine: Arc<dyn EngineClient>, agent: AgentConfig, turn: TurnConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            engine,
            agent,
            turn,
        }
    }

    pub(crate) fn engine(&self) -> &Arc<dyn EngineClient> {
        &self.engine
    }

    pub(crate) fn agent_config(&self) -> &AgentConfig {
        &self.agent
    }

    pub(crate) fn turn_config(&self) -> &TurnConfig {
        &self.turn
    }

    /// Start a session for a channel.
    ///
    /// Fails if one already exists (first concurrent caller wins) or if an
    /// explicit working-directory override does not exist. With an initial
    /// prompt the session enters `RunningTurn` immediately; without one it
    /// starts idle.
    pub async fn start_session(
        self: &Arc<Self>,
        channel_id: &str,
        initial_prompt: Option<&str>,
        sink: Arc<dyn EventSink>,
        cwd_override: Option<PathBuf>,
    ) -> Result<(), SessionError> {
        let cwd = match cwd_override {
            Some(dir) => {
                let is_dir = tokio::fs::metadata(&dir)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    return Err(SessionError::InvalidWorkingDirectory(dir));
                }
                dir
            }
            None => self.agent.default_working_directory.clone(),
        };

        let mut session = Session::new(channel_id, cwd, sink);
        // Set the initial state before the session is shared; nothing may
        // ever observe a queued message on a non-running session.
        session.set_initial_state(if initial_prompt.is_some() {
            SessionState::RunningTurn
        } else {
            SessionState::Idle
        });
        let session = Arc::new(session);

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(channel_id) {
                return Err(SessionError::AlreadyActive(channel_id.to_string()));
            }
            sessions.insert(channel_id.to_string(), Arc::clone(&session));
        }

        tracing::info!(channel = %channel_id, cwd = %session.cwd().display(), "Session started");

        if let Some(prompt) = initial_prompt {
            self.spawn_turn(&session, prompt.to_string());
        }
        Ok(())
    }

    /// Submit a message to a channel's session.
    ///
    /// Idle session: a turn starts immediately (`Accepted`). Running turn:
    /// the message lands in the single pending slot, replacing any earlier
    /// queued one (`Queued`). No session: `NoSession`.
    pub async fn send_message(self: &Arc<Self>, channel_id: &str, text: &str) -> SendOutcome {
        let session = {
            let sessions = self.sessions.read().await;
            match sessions.get(channel_id) {
                Some(session) => Arc::clone(session),
                None => return SendOutcome::NoSession,
            }
        };

        let mut inner = session.lock().await;
        match inner.state {
            SessionState::Ended => SendOutcome::NoSession,
            SessionState::RunningTurn | SessionState::Starting => {
                if inner.pending_input.is_some() {
                    tracing::debug!(channel = %channel_id, "Replacing queued input; latest intent wins");
                }
                inner.pending_input = Some(text.to_string());
                SendOutcome::Queued
            }
            SessionState::Idle => {
                inner.state = SessionState::RunningTurn;
                self.spawn_turn(&session, text.to_string());
                SendOutcome::Accepted
            }
        }
    }

    /// End a channel's session. Idempotent.
    ///
    /// Cancels any in-flight turn and removes the session; nothing further is
    /// emitted for it, even if the engine stream still has buffered output.
    pub async fn end_session(&self, channel_id: &str) {
        let removed = self.sessions.write().await.remove(channel_id);
        let Some(session) = removed else {
            return;
        };

        let mut inner = session.lock().await;
        inner.state = SessionState::Ended;
        inner.pending_input = None;
        if let Some(cancel) = inner.turn_cancel.take() {
            cancel.cancel();
        }
        tracing::info!(channel = %channel_id, "Session ended");
    }

    /// Read-only snapshot of a channel's session, if one exists.
    pub async fn session_info(&self, channel_id: &str) -> Option<SessionInfo> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(channel_id).cloned()
        }?;
        Some(session.info().await)
    }

    /// Whether a session exists for the channel.
    pub async fn has_active_session(&self, channel_id: &str) -> bool {
        self.sessions.read().await.contains_key(channel_id)
    }

    /// Channel IDs with a live session.
    pub async fn active_channels(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Turn-completion handoff, invoked once per successful turn.
    ///
    /// Runs under the session mutex: a pending message starts the next turn
    /// with no idle notice in between; otherwise the session goes idle and a
    /// `Waiting` event is delivered before the mutex is released, so nothing
    /// from a subsequently accepted turn can order ahead of it.
    pub(crate) async fn finish_turn(self: &Arc<Self>, session: &Arc<Session>) {
        let mut inner = session.lock().await;
        if inner.state == SessionState::Ended {
            return;
        }
        inner.turn_cancel = None;

        match inner.pending_input.take() {
            Some(text) => {
                tracing::debug!(channel = %session.channel_id(), "Resuming with queued input");
                self.spawn_turn(session, text);
            }
            None => {
                inner.state = SessionState::Idle;
                session.deliver(SessionEvent::Waiting).await;
            }
        }
    }

    /// Terminal turn failure: one error event, then the session is gone.
    ///
    /// A session that was already ended (cancellation racing a failure)
    /// produces no event. The map entry is removed only while it still
    /// points at this session; a successor session started on the same
    /// channel after an explicit end must survive the old turn's cleanup.
    pub(crate) async fn fail_turn(self: &Arc<Self>, session: &Arc<Session>, message: String) {
        {
            let mut inner = session.lock().await;
            if inner.state == SessionState::Ended {
                return;
            }
            inner.state = SessionState::Ended;
            inner.pending_input = None;
            inner.turn_cancel = None;
        }

        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(session.channel_id())
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(session.channel_id());
            }
        }

        tracing::error!(channel = %session.channel_id(), "Session terminated: {}", message);
        session.deliver(SessionEvent::Error(message)).await;
    }

    fn spawn_turn(self: &Arc<Self>, session: &Arc<Session>, prompt: String) {
        let registry = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            turn::run_turn(registry, session, prompt).await;
        });
    }
}
