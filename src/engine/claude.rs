//! Engine client backed by the `claude` CLI.
//!
//! Each invocation spawns `claude -p <prompt> --output-format stream-json`
//! and parses one JSON event per stdout line. Unrecognized lines are skipped
//! so protocol additions never kill a turn. Cancelling the supplied token
//! kills the child process and ends the stream with
//! [`EngineError::Cancelled`].

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::{ContentBlock, EngineClient, EngineEvent, EventStream, InvokeOptions};
use crate::error::EngineError;

/// How many buffered events the reader may run ahead of the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Engine client that shells out to the Claude Code CLI.
pub struct ClaudeCodeEngine {
    binary: String,
}

impl ClaudeCodeEngine {
    /// Create a client using the given binary name or path.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn build_command(&self, prompt: &str, opts: &InvokeOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");

        if let Some(token) = &opts.resume_token {
            cmd.arg("--resume").arg(token);
        } else if opts.continue_most_recent {
            cmd.arg("--continue");
        }
        if opts.skip_approvals {
            cmd.arg("--dangerously-skip-permissions");
        }

        cmd.current_dir(&opts.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl EngineClient for ClaudeCodeEngine {
    async fn invoke(&self, prompt: &str, opts: InvokeOptions) -> Result<EventStream, EngineError> {
        let mut child = self
            .build_command(prompt, &opts)
            .spawn()
            .map_err(EngineError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::Stream("engine child has no stdout handle".to_string())
        })?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = opts.cancel.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut completed = false;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!("Failed to kill engine child: {}", e);
                        }
                        let _ = child.wait().await;
                        let _ = tx.send(Err(EngineError::Cancelled)).await;
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match parse_line(trimmed) {
                                Some(Ok(event)) => {
                                    if matches!(event, EngineEvent::Completed { .. }) {
                                        completed = true;
                                    }
                                    if tx.send(Ok(event)).await.is_err() {
                                        // Consumer gone; stop reading.
                                        let _ = child.start_kill();
                                        let _ = child.wait().await;
                                        return;
                                    }
                                }
                                Some(Err(e)) => {
                                    let _ = tx.send(Err(e)).await;
                                    // Stop reading here; kill so a child that
                                    // keeps writing cannot block on the pipe.
                                    let _ = child.start_kill();
                                    let _ = child.wait().await;
                                    return;
                                }
                                None => {
                                    tracing::trace!("Ignoring unrecognized engine line: {}", trimmed);
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx
                                .send(Err(EngineError::Stream(format!(
                                    "failed to read engine output: {e}"
                                ))))
                                .await;
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            return;
                        }
                    }
                }
            }

            // Stdout closed; reconcile with the exit status.
            let status = match child.wait().await {
                Ok(status) => status,
                Err(e) => {
                    let _ = tx
                        .send(Err(EngineError::Stream(format!(
                            "failed to await engine exit: {e}"
                        ))))
                        .await;
                    return;
                }
            };

            if !status.success() && !completed {
                let mut detail = String::new();
                if let Some(mut stderr) = stderr {
                    let mut buf = String::new();
                    if stderr.read_to_string(&mut buf).await.is_ok() {
                        detail = tail(&buf, 500);
                    }
                }
                let _ = tx
                    .send(Err(EngineError::Exited {
                        status: status.to_string(),
                        detail,
                    }))
                    .await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Raw stream-json event shape. Fields not needed here are simply absent.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    subtype: Option<String>,
    session_id: Option<String>,
    message: Option<RawMessage>,
    total_cost_usd: Option<f64>,
    is_error: Option<bool>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

/// Parse one stdout line into an engine event.
///
/// Returns `None` for lines that parse as JSON but carry nothing we track
/// (user echoes, tool results) and for lines that don't parse at all.
fn parse_line(line: &str) -> Option<Result<EngineEvent, EngineError>> {
    let raw: RawEvent = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("Malformed engine event skipped: {}", e);
            return None;
        }
    };

    match raw.kind.as_str() {
        "system" if raw.subtype.as_deref() == Some("init") => {
            raw.session_id.map(|session_id| Ok(EngineEvent::Init { session_id }))
        }
        "assistant" => {
            let blocks: Vec<ContentBlock> = raw
                .message?
                .content
                .into_iter()
                .filter_map(|block| match block.kind.as_str() {
                    "text" => block.text.map(ContentBlock::Text),
                    "tool_use" => Some(ContentBlock::ToolUse {
                        name: block.name.unwrap_or_else(|| "unknown".to_string()),
                        input: block.input.unwrap_or(serde_json::Value::Null),
                    }),
                    _ => None,
                })
                .collect();
            if blocks.is_empty() {
                None
            } else {
                Some(Ok(EngineEvent::Assistant(blocks)))
            }
        }
        "result" => {
            if raw.is_error == Some(true) {
                let detail = raw
                    .result
                    .unwrap_or_else(|| "engine reported an error result".to_string());
                Some(Err(EngineError::Stream(detail)))
            } else {
                Some(Ok(EngineEvent::Completed {
                    session_id: raw.session_id,
                    cost_usd: raw.total_cost_usd,
                }))
            }
        }
        _ => None,
    }
}

/// Last `max` characters of a string, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    if count <= max {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_init() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#;
        assert_eq!(
            parse_line(line).unwrap().unwrap(),
            EngineEvent::Init {
                session_id: "abc-123".to_string()
            }
        );
    }

    #[test]
    fn parses_assistant_text_and_tool_use() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"hello"},
            {"type":"tool_use","name":"Read","input":{"file_path":"src/main.rs"}}
        ]},"session_id":"abc"}"#;
        let event = parse_line(line).unwrap().unwrap();
        match event {
            EngineEvent::Assistant(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert_eq!(blocks[0], ContentBlock::Text("hello".to_string()));
                match &blocks[1] {
                    ContentBlock::ToolUse { name, input } => {
                        assert_eq!(name, "Read");
                        assert_eq!(input["file_path"], "src/main.rs");
                    }
                    other => panic!("expected tool_use, got {other:?}"),
                }
            }
            other => panic!("expected assistant event, got {other:?}"),
        }
    }

    #[test]
    fn parses_successful_result() {
        let line = r#"{"type":"result","subtype":"success","session_id":"abc","total_cost_usd":0.042}"#;
        assert_eq!(
            parse_line(line).unwrap().unwrap(),
            EngineEvent::Completed {
                session_id: Some("abc".to_string()),
                cost_usd: Some(0.042),
            }
        );
    }

    #[test]
    fn error_result_becomes_stream_error() {
        let line = r#"{"type":"result","subtype":"error","is_error":true,"result":"boom"}"#;
        match parse_line(line).unwrap() {
            Err(EngineError::Stream(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected stream error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_are_skipped() {
        assert!(parse_line(r#"{"type":"user","message":{"content":[]}}"#).is_none());
        assert!(parse_line(r#"{"type":"future_thing","payload":1}"#).is_none());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert!(parse_line("not json at all").is_none());
        assert!(parse_line(r#"{"type":42}"#).is_none());
    }

    #[test]
    fn assistant_with_no_tracked_blocks_is_skipped() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"..."}]}}"#;
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn tail_truncates_from_the_front() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
