//! # devterm-pty
//!
//! Pseudoterminal process management for the devterm backend.
//!
//! This crate provides:
//! - Shell selection and baseline environment per platform
//! - Advisory shell command text (directory change, command lines)
//! - PTY (pseudo-terminal) lifecycle management with channel-based output
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on devterm-core and
//! knows nothing about session ids, registries or the UI channel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pty;
pub mod shell;

// Re-export commonly used types
pub use pty::{PtyEvent, PtyEvents, PtySession, PtySpawnSpec, TerminationMode};
pub use shell::{normalize_path, ResolvedShell, ShellKind, ShellResolver};
