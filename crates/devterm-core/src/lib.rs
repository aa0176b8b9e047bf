//! # devterm-core
//!
//! Core types for the devterm terminal backend.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other devterm crates. It provides:
//!
//! - Geometry types (Dimensions)
//! - Session types (SessionId, SessionState, SessionInfo)
//! - Push event types (SessionEvent, ExitStatus)
//! - Platform detection
//! - Server configuration
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other devterm crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event;
pub mod geometry;
pub mod platform;
pub mod session;

// Re-export commonly used types
pub use config::{ServerConfig, ServerSettings, TerminalSettings};
pub use error::{Error, Result};
pub use event::{ExitStatus, SessionEvent};
pub use geometry::Dimensions;
pub use platform::Platform;
pub use session::{SessionId, SessionInfo, SessionState};
