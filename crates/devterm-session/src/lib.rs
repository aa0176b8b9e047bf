//! # devterm-session
//!
//! Session lifecycle management for the devterm backend.
//!
//! This crate provides:
//! - Session identifier allocation and the session registry
//! - Session state tracking (`Starting → Running → Closing → Closed`)
//! - Output and exit forwarding to an [`EventSink`]
//! - The [`TerminalSessionManager`] request surface
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on devterm-core and
//! devterm-pty to manage terminal session lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod events;
pub mod manager;
pub mod registry;
pub mod session;

// Re-export commonly used types
pub use events::EventSink;
pub use manager::{SessionManagerConfig, TerminalSessionManager};
pub use registry::SessionRegistry;
pub use session::Session;
