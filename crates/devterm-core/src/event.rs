//! Push events emitted by the session manager.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::SessionId;

/// How a shell process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExitStatus {
    /// Process exit code (`-1` when the code could not be collected)
    pub exit_code: i32,
    /// Name of the terminating signal, if the process was killed by one
    pub signal: Option<String>,
}

impl ExitStatus {
    /// Status of a process that exited on its own.
    pub fn with_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            signal: None,
        }
    }

    /// Status used when the exit code could not be collected.
    pub fn unknown() -> Self {
        Self::with_code(-1)
    }

    /// Exit code zero and no signal.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }
}

/// Unsolicited event delivered to the UI for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionEvent {
    /// Raw bytes produced by the session's process, in emission order
    Output {
        /// Session the bytes belong to
        id: SessionId,
        /// Raw output chunk
        data: Vec<u8>,
    },
    /// The session's process terminated; delivered exactly once per session
    Exit {
        /// Session that ended
        id: SessionId,
        /// How the process ended
        status: ExitStatus,
    },
}

impl SessionEvent {
    /// Session this event is addressed to.
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Output { id, .. } | SessionEvent::Exit { id, .. } => *id,
        }
    }
}
