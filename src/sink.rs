//! Session event vocabulary and delivery boundary.
//!
//! The sequencer produces a small, normalized set of events per session.
//! Destinations (Slack, console) implement [`EventSink`]; the core only ever
//! talks to that trait and relies on deliveries completing in call order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SinkError;

/// A normalized event surfaced by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Batched assistant text, debounced from streamed fragments.
    Text(String),
    /// Human-readable description of one or more tool invocations.
    ToolUse(String),
    /// The turn finished and the session is waiting for input.
    Waiting,
    /// The turn is still running but has been silent for a while.
    Heartbeat,
    /// The turn failed; the session has been removed.
    Error(String),
}

/// Destination for session events, one per channel.
///
/// Implementations must tolerate being called at the pace the core produces
/// events; use [`PacedSink`] in front of rate-limited destinations. Delivery
/// failures are logged by the caller and never roll back sequencer state.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Completes only once the destination accepted it.
    async fn deliver(&self, event: SessionEvent) -> Result<(), SinkError>;
}

/// Decorator that serializes deliveries and enforces a minimum interval
/// between them.
///
/// Chat APIs cap posting at roughly one message per second per channel. The
/// internal mutex is held across the inner delivery so concurrent callers
/// drain strictly in order.
pub struct PacedSink {
    inner: Arc<dyn EventSink>,
    min_interval: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl PacedSink {
    /// Wrap a sink with a minimum delivery interval.
    pub fn new(inner: Arc<dyn EventSink>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_send: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EventSink for PacedSink {
    async fn deliver(&self, event: SessionEvent) -> Result<(), SinkError> {
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            let due = prev + self.min_interval;
            let now = Instant::now();
            if due > now {
                tokio::time::sleep_until(due).await;
            }
        }
        let result = self.inner.deliver(event).await;
        *last = Some(Instant::now());
        result
    }
}
