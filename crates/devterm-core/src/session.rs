//! Session types for terminal session management.

use std::path::PathBuf;
use std::time::SystemTime;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Dimensions;

/// Unique identifier for a terminal session.
///
/// Identifiers are handed out by the session registry in increasing order and
/// are never reused within one backend process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw identifier value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw identifier value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a terminal session.
///
/// States only ever move forward: `Starting → Running → Closing → Closed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Spawn requested, not yet confirmed running
    Starting,
    /// Process is running and I/O is flowing
    Running,
    /// Termination requested or exit observed, cleanup in flight
    Closing,
    /// Deregistered and OS resources released
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        next > self
    }

    /// Whether the session may still deliver output.
    pub fn is_live(self) -> bool {
        self == SessionState::Running
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Information about a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Shell program running in the session
    pub shell: String,
    /// Current terminal dimensions
    pub dimensions: Dimensions,
    /// Directory the shell was started in (advisory)
    pub working_directory: PathBuf,
    /// Current lifecycle state
    pub state: SessionState,
    /// Creation time
    pub created_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::new(42).to_string(), "42");
    }

    #[test]
    fn test_session_id_serializes_as_number() {
        let json = serde_json::to_string(&SessionId::new(3)).unwrap();
        assert_eq!(json, "3");
        let id: SessionId = serde_json::from_str("17").unwrap();
        assert_eq!(id.get(), 17);
    }

    #[test]
    fn test_state_transitions_are_forward_only() {
        use SessionState::*;

        assert!(Starting.can_advance_to(Running));
        assert!(Running.can_advance_to(Closing));
        assert!(Closing.can_advance_to(Closed));
        assert!(Starting.can_advance_to(Closed));

        assert!(!Running.can_advance_to(Starting));
        assert!(!Closing.can_advance_to(Running));
        assert!(!Closed.can_advance_to(Closing));
        assert!(!Running.can_advance_to(Running));
    }

    #[test]
    fn test_only_running_is_live() {
        assert!(SessionState::Running.is_live());
        assert!(!SessionState::Starting.is_live());
        assert!(!SessionState::Closing.is_live());
        assert!(!SessionState::Closed.is_live());
    }

    #[test]
    fn test_session_info_serialization() {
        let info = SessionInfo {
            id: SessionId::new(1),
            shell: "/bin/sh".to_string(),
            dimensions: Dimensions::default(),
            working_directory: PathBuf::from("/tmp"),
            state: SessionState::Running,
            created_at: SystemTime::UNIX_EPOCH,
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["state"], "running");
        assert_eq!(json["workingDirectory"], "/tmp");

        let back: SessionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }
}
