//! Agent turn driver.
//!
//! Drives exactly one conversational turn: invokes the engine, consumes its
//! event stream, and paces the normalized output. Text fragments are
//! debounced into batched `Text` events, tool invocations become short
//! deduplicated descriptions, and long silences produce heartbeats. On
//! success control returns to the registry, which decides whether a queued
//! message starts the next turn.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TurnConfig;
use crate::engine::{ContentBlock, EngineEvent, InvokeOptions};
use crate::error::EngineError;
use crate::session::registry::SessionRegistry;
use crate::session::session::{Session, SessionState};
use crate::sink::SessionEvent;

/// Maximum length of a derived tool description, in chars.
const TOOL_DESCRIPTION_MAX: usize = 120;

/// Input keys checked first when deriving a tool description, most salient
/// first. Falls back to the first non-empty string value so the label never
/// depends on JSON key ordering.
const SALIENT_KEYS: &[&str] = &[
    "command",
    "file_path",
    "path",
    "pattern",
    "query",
    "url",
    "prompt",
    "description",
];

/// Run one turn for a session. The result is delivered through the session's
/// sink and the registry handoff, never as a return value.
pub(crate) async fn run_turn(registry: Arc<SessionRegistry>, session: Arc<Session>, prompt: String) {
    let cancel = CancellationToken::new();
    let resume_token = {
        let mut inner = session.lock().await;
        if inner.state == SessionState::Ended {
            return;
        }
        // Stored before the engine call so external cancellation is possible
        // from the moment the turn exists.
        inner.turn_cancel = Some(cancel.clone());
        inner.message_count += 1;
        inner.resume_token.clone()
    };

    let agent = registry.agent_config();
    let opts = InvokeOptions {
        cwd: session.cwd().to_path_buf(),
        continue_most_recent: resume_token.is_none() && agent.continue_most_recent,
        skip_approvals: agent.skip_approvals,
        resume_token,
        cancel,
    };

    tracing::debug!(channel = %session.channel_id(), "Starting agent turn");

    let mut stream = match registry.engine().invoke(&prompt, opts).await {
        Ok(stream) => stream,
        Err(e) => {
            finish(&registry, &session, Err(e)).await;
            return;
        }
    };

    let mut pacer = OutputPacer::new(registry.turn_config().clone());
    let mut outcome: Result<(), EngineError> = Ok(());

    loop {
        let deadline = pacer.next_deadline();
        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(EngineEvent::Assistant(blocks))) => {
                    for block in blocks {
                        match block {
                            ContentBlock::Text(fragment) => pacer.on_text(&session, &fragment).await,
                            ContentBlock::ToolUse { name, input } => {
                                pacer.on_tool(&session, &name, &input).await
                            }
                        }
                    }
                }
                Some(Ok(EngineEvent::Init { session_id })) => {
                    session.set_resume_token_if_unset(&session_id).await;
                }
                Some(Ok(EngineEvent::Completed { session_id, cost_usd })) => {
                    if let Some(id) = session_id {
                        session.set_resume_token_if_unset(&id).await;
                    }
                    if let Some(cost) = cost_usd {
                        tracing::debug!(channel = %session.channel_id(), cost_usd = cost, "Turn cost");
                    }
                    break;
                }
                Some(Err(e)) => {
                    outcome = Err(e);
                    break;
                }
                // Stream closed without a completion event: tolerated as a
                // successful completion.
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                pacer.on_deadline(&session).await;
            }
        }
    }

    finish(&registry, &session, outcome.map(|()| pacer)).await;
}

/// Completion/failure handoff shared by all exit paths.
async fn finish(
    registry: &Arc<SessionRegistry>,
    session: &Arc<Session>,
    outcome: Result<OutputPacer, EngineError>,
) {
    match outcome {
        Ok(mut pacer) => {
            // Force-flush bypasses the debounce and batch timers; delivery
            // completes before the handoff decision is made.
            pacer.flush_all(session).await;
            registry.finish_turn(session).await;
        }
        Err(EngineError::Cancelled) => {
            if session.is_active().await {
                // Cancellation we didn't ask for: the engine died under us.
                registry
                    .fail_turn(session, "Agent turn was interrupted".to_string())
                    .await;
            } else {
                // User ended the session mid-turn; clean abort, no event, and
                // the session (already removed) is not touched again.
                tracing::debug!(channel = %session.channel_id(), "Turn cancelled cleanly");
            }
        }
        Err(e) => {
            registry
                .fail_turn(session, format!("Agent turn failed: {e}"))
                .await;
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}

/// Paces one turn's output: debounced text, batched deduplicated tool
/// descriptions, and heartbeats during long silences.
struct OutputPacer {
    cfg: TurnConfig,
    text: String,
    tools: Vec<String>,
    last_tool: Option<String>,
    text_deadline: Option<Instant>,
    tool_deadline: Option<Instant>,
    heartbeat_deadline: Option<Instant>,
}

impl OutputPacer {
    fn new(cfg: TurnConfig) -> Self {
        let heartbeat_deadline = cfg
            .heartbeat_enabled
            .then(|| Instant::now() + cfg.heartbeat_interval);
        Self {
            cfg,
            text: String::new(),
            tools: Vec::new(),
            last_tool: None,
            text_deadline: None,
            tool_deadline: None,
            heartbeat_deadline,
        }
    }

    /// Earliest armed deadline, if any.
    fn next_deadline(&self) -> Option<Instant> {
        [self.text_deadline, self.tool_deadline, self.heartbeat_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// A text fragment arrived: any batched tool descriptions flush first
    /// (they happened earlier), then the debounce window re-arms.
    async fn on_text(&mut self, session: &Session, fragment: &str) {
        self.flush_tools(session).await;
        self.text.push_str(fragment);
        self.text_deadline = Some(Instant::now() + self.cfg.debounce);
    }

    /// A tool invocation arrived: buffered text flushes immediately so tool
    /// notices never precede or interleave with earlier text, then the
    /// derived description is deduplicated and batched.
    async fn on_tool(&mut self, session: &Session, name: &str, input: &serde_json::Value) {
        self.flush_text(session).await;

        let description = describe_tool(name, input);
        if self.last_tool.as_deref() == Some(description.as_str()) {
            return;
        }
        self.last_tool = Some(description.clone());
        self.tools.push(description);
        self.tool_deadline = Some(Instant::now() + self.cfg.tool_batch_window);
    }

    /// Fire whichever deadlines are due.
    async fn on_deadline(&mut self, session: &Session) {
        let now = Instant::now();
        if self.text_deadline.is_some_and(|at| at <= now) {
            self.flush_text(session).await;
        }
        if self.tool_deadline.is_some_and(|at| at <= now) {
            self.flush_tools(session).await;
        }
        if self.heartbeat_deadline.is_some_and(|at| at <= now) {
            session.deliver_if_active(SessionEvent::Heartbeat).await;
            self.rearm_heartbeat();
        }
    }

    /// Force-flush all buffers, bypassing timers.
    async fn flush_all(&mut self, session: &Session) {
        self.flush_text(session).await;
        self.flush_tools(session).await;
    }

    async fn flush_text(&mut self, session: &Session) {
        self.text_deadline = None;
        if self.text.trim().is_empty() {
            self.text.clear();
            return;
        }
        let content = std::mem::take(&mut self.text);
        session.deliver_if_active(SessionEvent::Text(content)).await;
        self.rearm_heartbeat();
    }

    async fn flush_tools(&mut self, session: &Session) {
        self.tool_deadline = None;
        if self.tools.is_empty() {
            return;
        }
        let content = std::mem::take(&mut self.tools).join("\n");
        session
            .deliver_if_active(SessionEvent::ToolUse(content))
            .await;
        self.rearm_heartbeat();
    }

    /// Any flush proves liveness; the silence window restarts from it.
    fn rearm_heartbeat(&mut self) {
        if self.cfg.heartbeat_enabled {
            self.heartbeat_deadline = Some(Instant::now() + self.cfg.heartbeat_interval);
        }
    }
}

/// Derive a short human-readable description of a tool invocation from its
/// name and most salient string input.
fn describe_tool(name: &str, input: &serde_json::Value) -> String {
    let salient = input.as_object().and_then(|map| {
        SALIENT_KEYS
            .iter()
            .find_map(|key| non_empty_str(map.get(*key)))
            .or_else(|| map.values().find_map(|v| non_empty_str(Some(v))))
    });

    let label = match salient {
        Some(value) => format!("{name}: {value}"),
        None => name.to_string(),
    };
    truncate_chars(&label, TOOL_DESCRIPTION_MAX)
}

fn non_empty_str(value: Option<&serde_json::Value>) -> Option<&str> {
    value.and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sink::EventSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        async fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: SessionEvent) -> Result<(), SinkError> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    fn running_session(sink: Arc<RecordingSink>) -> Session {
        let mut session = Session::new("C1", PathBuf::from("/tmp"), sink);
        session.set_initial_state(SessionState::RunningTurn);
        session
    }

    fn pacer() -> OutputPacer {
        OutputPacer::new(TurnConfig::default())
    }

    // ==================== describe_tool ====================

    #[test]
    fn describe_tool_prefers_salient_keys() {
        let input = json!({"zebra": "ignored", "command": "cargo test"});
        assert_eq!(describe_tool("Bash", &input), "Bash: cargo test");
    }

    #[test]
    fn describe_tool_falls_back_to_first_string_value() {
        let input = json!({"alpha": 7, "beta": "value"});
        assert_eq!(describe_tool("Custom", &input), "Custom: value");
    }

    #[test]
    fn describe_tool_without_strings_is_just_the_name() {
        assert_eq!(describe_tool("Wait", &json!({"seconds": 5})), "Wait");
        assert_eq!(describe_tool("Noop", &serde_json::Value::Null), "Noop");
    }

    #[test]
    fn describe_tool_skips_empty_strings() {
        let input = json!({"command": "  ", "file_path": "src/lib.rs"});
        assert_eq!(describe_tool("Read", &input), "Read: src/lib.rs");
    }

    #[test]
    fn describe_tool_truncates_long_inputs() {
        let long = "x".repeat(500);
        let description = describe_tool("Bash", &json!({"command": long}));
        assert_eq!(description.chars().count(), TOOL_DESCRIPTION_MAX);
        assert!(description.ends_with('…'));
    }

    // ==================== OutputPacer ====================

    #[tokio::test(start_paused = true)]
    async fn rapid_fragments_merge_into_one_text_event() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        pacer.on_text(&session, "Hello ").await;
        tokio::time::advance(Duration::from_millis(200)).await;
        pacer.on_text(&session, "world").await;
        tokio::time::advance(Duration::from_millis(1200)).await;
        pacer.on_deadline(&session).await;

        assert_eq!(
            sink.events().await,
            vec![SessionEvent::Text("Hello world".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_only_buffer_is_dropped() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        pacer.on_text(&session, "  \n  ").await;
        tokio::time::advance(Duration::from_millis(1200)).await;
        pacer.on_deadline(&session).await;

        assert!(sink.events().await.is_empty());
        assert!(pacer.text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tool_flushes_pending_text_first() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        pacer.on_text(&session, "Looking at the code").await;
        pacer
            .on_tool(&session, "Read", &json!({"file_path": "src/lib.rs"}))
            .await;
        pacer.flush_all(&session).await;

        assert_eq!(
            sink.events().await,
            vec![
                SessionEvent::Text("Looking at the code".to_string()),
                SessionEvent::ToolUse("Read: src/lib.rs".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_identical_tools_are_suppressed() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        let read = json!({"file_path": "a.rs"});
        pacer.on_tool(&session, "Read", &read).await;
        pacer.on_tool(&session, "Read", &read).await;
        pacer.on_tool(&session, "Read", &json!({"file_path": "b.rs"})).await;
        pacer.flush_all(&session).await;

        assert_eq!(
            sink.events().await,
            vec![SessionEvent::ToolUse("Read: a.rs\nRead: b.rs".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tools_within_window_batch_into_one_event() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        pacer.on_tool(&session, "Read", &json!({"file_path": "a.rs"})).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        pacer.on_tool(&session, "Bash", &json!({"command": "ls"})).await;
        tokio::time::advance(Duration::from_millis(300)).await;
        pacer.on_deadline(&session).await;

        assert_eq!(
            sink.events().await,
            vec![SessionEvent::ToolUse("Read: a.rs\nBash: ls".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_after_silence_and_rearms() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        tokio::time::advance(Duration::from_secs(120)).await;
        pacer.on_deadline(&session).await;
        tokio::time::advance(Duration::from_secs(120)).await;
        pacer.on_deadline(&session).await;

        assert_eq!(
            sink.events().await,
            vec![SessionEvent::Heartbeat, SessionEvent::Heartbeat]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flush_rebases_the_heartbeat_window() {
        let sink = RecordingSink::new();
        let session = running_session(sink.clone());
        let mut pacer = pacer();

        tokio::time::advance(Duration::from_secs(119)).await;
        pacer.on_text(&session, "still here").await;
        pacer.flush_text(&session).await;

        // One second shy of the original deadline; the flush pushed it out.
        tokio::time::advance(Duration::from_secs(1)).await;
        pacer.on_deadline(&session).await;

        let events = sink.events().await;
        assert_eq!(events, vec![SessionEvent::Text("still here".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_heartbeat_never_arms() {
        let cfg = TurnConfig {
            heartbeat_enabled: false,
            ..TurnConfig::default()
        };
        let pacer = OutputPacer::new(cfg);
        assert!(pacer.next_deadline().is_none());
    }
}
