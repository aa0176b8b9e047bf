//! Error types for the devterm terminal backend.

use thiserror::Error;

use crate::SessionId;

/// Main error type for terminal session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Shell could not be started or no pseudoterminal could be allocated
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// PTY-related errors on an already running session
    #[error("PTY error: {0}")]
    PtyError(String),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// Invalid terminal dimensions
    #[error("Invalid dimensions: {rows}x{cols}")]
    InvalidDimensions {
        /// Number of rows
        rows: u16,
        /// Number of columns
        cols: u16,
    },

    /// Session already terminated
    #[error("Session already terminated")]
    SessionTerminated,

    /// The manager is shutting down and accepts no new sessions
    #[error("Session manager is shutting down")]
    ShuttingDown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
