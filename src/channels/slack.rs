//! Slack delivery via chat.postMessage.
//!
//! One sink per Slack channel (optionally threaded). Each session event maps
//! to a single post; rendering is deliberately minimal, markdown transforms
//! belong to a separate collaborator. Slack rate limits per channel, so this
//! sink is normally wrapped in a [`PacedSink`](crate::sink::PacedSink).

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::sink::{EventSink, SessionEvent};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Sink that posts session events to one Slack channel.
pub struct SlackSink {
    client: Client,
    bot_token: SecretString,
    channel: String,
    thread_ts: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackSink {
    /// Create a sink posting to the given channel.
    pub fn new(bot_token: SecretString, channel: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            bot_token,
            channel: channel.into(),
            thread_ts: None,
        }
    }

    /// Reply inside a thread instead of the channel root.
    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }

    /// Fixed per-event rendering; no markdown transformation.
    fn render(event: &SessionEvent) -> String {
        match event {
            SessionEvent::Text(content) => content.clone(),
            SessionEvent::ToolUse(content) => format!("🔧 {content}"),
            SessionEvent::Waiting => "✅ Done. Waiting for your next message.".to_string(),
            SessionEvent::Heartbeat => "⏳ Still working...".to_string(),
            SessionEvent::Error(message) => format!("❌ {message}"),
        }
    }
}

#[async_trait]
impl EventSink for SlackSink {
    async fn deliver(&self, event: SessionEvent) -> Result<(), SinkError> {
        let text = Self::render(&event);
        let request = PostMessageRequest {
            channel: &self.channel,
            text: &text,
            thread_ts: self.thread_ts.as_deref(),
        };

        let response = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(self.bot_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| SinkError::delivery("slack", e))?;

        if !response.status().is_success() {
            return Err(SinkError::delivery(
                "slack",
                format!("HTTP {}", response.status()),
            ));
        }

        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| SinkError::delivery("slack", e))?;

        if !body.ok {
            return Err(SinkError::delivery(
                "slack",
                body.error.unwrap_or_else(|| "unknown Slack error".to_string()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_each_event_kind() {
        assert_eq!(
            SlackSink::render(&SessionEvent::Text("hi".to_string())),
            "hi"
        );
        assert_eq!(
            SlackSink::render(&SessionEvent::ToolUse("Read: a.rs".to_string())),
            "🔧 Read: a.rs"
        );
        assert!(SlackSink::render(&SessionEvent::Waiting).contains("Waiting"));
        assert!(SlackSink::render(&SessionEvent::Heartbeat).contains("Still working"));
        assert!(
            SlackSink::render(&SessionEvent::Error("boom".to_string())).contains("boom")
        );
    }

    #[test]
    fn request_serializes_without_thread_when_unset() {
        let request = PostMessageRequest {
            channel: "C1",
            text: "hello",
            thread_ts: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["channel"], "C1");
        assert!(json.get("thread_ts").is_none());
    }
}
