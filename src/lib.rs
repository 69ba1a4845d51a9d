//! relayclaw: bridges chat channels to a turn-based coding agent.
//!
//! One logical conversation per channel is multiplexed onto a sequence of
//! engine invocations. The agent cannot be interrupted mid-turn, so the core
//! is a per-channel turn-sequencing state machine: input arriving during a
//! turn is queued (latest wins), streamed output is debounced and batched,
//! and a completed turn either auto-resumes with the queued message or
//! parks the session idle.
//!
//! Layering:
//! - [`engine`]: the agent engine boundary and the Claude Code CLI client.
//! - [`session`]: the registry, the per-channel state machine, and the
//!   turn driver.
//! - [`sink`]: the normalized event vocabulary and delivery boundary.
//! - [`channels`]: Slack and console sinks.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod sink;

pub use config::Config;
pub use session::{SendOutcome, SessionInfo, SessionRegistry};
pub use sink::{EventSink, PacedSink, SessionEvent};
