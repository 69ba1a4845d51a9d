//! Console sink for the interactive bridge.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::sink::{EventSink, SessionEvent};

/// Prints session events to stdout.
pub struct ConsoleSink;

#[async_trait]
impl EventSink for ConsoleSink {
    async fn deliver(&self, event: SessionEvent) -> Result<(), SinkError> {
        match event {
            SessionEvent::Text(content) => println!("{content}"),
            SessionEvent::ToolUse(content) => {
                for line in content.lines() {
                    println!("  [tool] {line}");
                }
            }
            SessionEvent::Waiting => println!("-- waiting for input --"),
            SessionEvent::Heartbeat => println!("-- still working --"),
            SessionEvent::Error(message) => eprintln!("error: {message}"),
        }
        Ok(())
    }
}
