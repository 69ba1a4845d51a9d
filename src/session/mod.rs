//! Per-channel session registry and turn sequencing.
//!
//! One [`Session`] per channel, owned by the [`SessionRegistry`]. Incoming
//! messages either start a turn or land in the session's single pending
//! slot; the turn driver streams normalized events to the session's sink and
//! hands completed turns back to the registry.

mod registry;
#[allow(clippy::module_inception)]
mod session;
mod turn;

pub use registry::SessionRegistry;
pub use session::{SendOutcome, Session, SessionInfo, SessionState};
