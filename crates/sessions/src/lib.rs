//! Owns per-connection run state: cancel flags, single-inflight enforcement,
//! and the registry tying connection ids to that state.

pub mod registry;
pub mod session;

pub use registry::SessionRegistry;
pub use session::{RunGuard, Session};
