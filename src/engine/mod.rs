//! Agent engine boundary.
//!
//! The sequencer drives turns against an [`EngineClient`], which yields a
//! stream of normalized [`EngineEvent`]s for one invocation. The production
//! implementation wraps the `claude` CLI ([`claude::ClaudeCodeEngine`]);
//! tests script their own.

mod claude;

pub use claude::ClaudeCodeEngine;

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Stream of engine events for a single invocation.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EngineEvent, EngineError>> + Send>>;

/// Options for one engine invocation.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Working directory for the invocation.
    pub cwd: PathBuf,
    /// Resume an existing conversational context, when known.
    pub resume_token: Option<String>,
    /// Continue the engine's most recent conversation when starting fresh.
    pub continue_most_recent: bool,
    /// Skip all approval prompts inside the engine.
    pub skip_approvals: bool,
    /// Cancelling this token terminates the invocation; the stream then ends
    /// with [`EngineError::Cancelled`] rather than an ordinary error.
    pub cancel: CancellationToken,
}

/// One content block inside an assistant event.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// A fragment of assistant text.
    Text(String),
    /// A tool invocation with its raw input.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
}

/// Normalized event vocabulary emitted by an engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Assistant output, in the order the engine produced it.
    Assistant(Vec<ContentBlock>),
    /// The turn finished successfully.
    Completed {
        session_id: Option<String>,
        cost_usd: Option<f64>,
    },
    /// Engine/system initialization carrying the resumption handle.
    Init { session_id: String },
}

/// Collaborator that runs one conversational turn.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Start an invocation and return its event stream.
    ///
    /// The stream suspends between events and terminates after a
    /// `Completed` event, an error, or cancellation.
    async fn invoke(&self, prompt: &str, opts: InvokeOptions) -> Result<EventStream, EngineError>;
}
