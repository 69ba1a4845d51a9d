//! Error types for relayclaw.
//!
//! One enum per concern, mirroring the module boundaries: configuration,
//! session lifecycle, engine invocation, and event delivery.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors surfaced by the session registry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session already exists for the channel; the first start wins.
    #[error("a session is already active for channel {0}")]
    AlreadyActive(String),

    /// The requested working directory override does not exist.
    #[error("working directory does not exist: {}", .0.display())]
    InvalidWorkingDirectory(PathBuf),
}

/// Errors from the agent engine collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be started.
    #[error("failed to spawn agent engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine's event stream failed mid-turn.
    #[error("engine stream failed: {0}")]
    Stream(String),

    /// The engine process exited abnormally.
    #[error("engine exited with {status}: {detail}")]
    Exited { status: String, detail: String },

    /// The invocation was cancelled through the supplied handle.
    ///
    /// Distinguishable from ordinary failures so a user-initiated session end
    /// is not reported as an error.
    #[error("turn cancelled")]
    Cancelled,
}

/// Errors from an event sink collaborator.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination rejected or failed the delivery.
    #[error("failed to deliver event to {destination}: {reason}")]
    DeliveryFailed { destination: String, reason: String },
}

impl SinkError {
    /// Shorthand for a delivery failure.
    pub fn delivery(destination: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeliveryFailed {
            destination: destination.into(),
            reason: reason.to_string(),
        }
    }
}
