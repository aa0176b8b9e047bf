//! devterm transport library
//!
//! This library contains the JSON-lines protocol types and handlers that put
//! a [`devterm_session::TerminalSessionManager`] on stdin/stdout.
//! The actual server binary is in main.rs.

pub mod codec;
pub mod messages;
pub mod protocol;

// Re-export commonly used types
pub use codec::{EventEncoder, Utf8Decoder};
pub use messages::{ErrorBody, Event, Method, Request, Response};
pub use protocol::{serve, TerminalServer};
