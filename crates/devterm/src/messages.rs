//! Protocol message types.
//!
//! Every message is one JSON object on its own line. The UI sends
//! [`Request`]s, the backend answers each with a [`Response`] carrying the same
//! id and pushes [`Event`]s whenever a terminal produces output or exits.

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use devterm_core::{Error, SessionId, SessionInfo};

// =============================================================================
// Error codes
// =============================================================================

/// The line is not valid JSON or not a request object.
pub const PARSE_ERROR: i64 = -32700;
/// Unknown method name.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters do not match the method.
pub const INVALID_PARAMS: i64 = -32602;
/// The backend failed to carry out the request.
pub const INTERNAL_ERROR: i64 = -32603;
/// No more sessions can be created.
pub const SESSION_LIMIT: i64 = -32001;
/// The backend is shutting down.
pub const SHUTTING_DOWN: i64 = -32002;

// =============================================================================
// Envelopes
// =============================================================================

/// Request sent by the UI.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    /// Correlation id echoed in the response
    pub id: u64,

    /// Method name, e.g. `terminal-create`
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

/// Answer to one request: exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Response {
    /// Id of the request being answered; null when the request was unreadable
    pub id: Option<u64>,

    /// Method result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(id: Option<u64>, error: ErrorBody) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Error payload of a failed [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    /// Numeric error code
    pub code: i64,

    /// Human-readable message
    pub message: String,
}

impl ErrorBody {
    /// Build an error payload.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        let code = match error {
            Error::InvalidDimensions { .. } | Error::InvalidInput(_) => INVALID_PARAMS,
            Error::SessionLimitReached(_) => SESSION_LIMIT,
            Error::ShuttingDown => SHUTTING_DOWN,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, error.to_string())
    }
}

/// Unsolicited message pushed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    /// Output produced by a terminal
    TerminalData {
        /// Terminal the output belongs to
        #[serde(rename = "terminalId")]
        terminal_id: SessionId,
        /// Output text
        data: String,
    },
    /// A terminal's shell exited
    TerminalExit {
        /// Terminal that exited
        #[serde(rename = "terminalId")]
        terminal_id: SessionId,
        /// Process exit code
        #[serde(rename = "exitCode")]
        exit_code: i32,
        /// Terminating signal, if any
        signal: Option<String>,
    },
}

// =============================================================================
// Methods
// =============================================================================

/// Request methods understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `terminal-create`
    Create,
    /// `terminal-resize`
    Resize,
    /// `terminal-write`
    Write,
    /// `terminal-close`
    Close,
    /// `terminal-cd`
    ChangeDirectory,
    /// `terminal-execute`
    Execute,
    /// `terminal-list`
    List,
}

impl Method {
    /// Every method, in documentation order.
    pub const ALL: [Method; 7] = [
        Method::Create,
        Method::Resize,
        Method::Write,
        Method::Close,
        Method::ChangeDirectory,
        Method::Execute,
        Method::List,
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "terminal-create",
            Method::Resize => "terminal-resize",
            Method::Write => "terminal-write",
            Method::Close => "terminal-close",
            Method::ChangeDirectory => "terminal-cd",
            Method::Execute => "terminal-execute",
            Method::List => "terminal-list",
        }
    }

    /// Look a method up by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for `terminal-create`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    /// Terminal columns (default from configuration)
    #[serde(default)]
    pub cols: Option<u16>,

    /// Terminal rows (default from configuration)
    #[serde(default)]
    pub rows: Option<u16>,

    /// Starting directory (default: home directory)
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Response for `terminal-create`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    /// Identifier of the new terminal
    pub terminal_id: SessionId,

    /// Shell running in the terminal
    pub shell: String,

    /// Terminal columns
    pub cols: u16,

    /// Terminal rows
    pub rows: u16,
}

/// Parameters for `terminal-resize`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResizeParams {
    /// Terminal to resize
    pub terminal_id: SessionId,

    /// New column count
    pub cols: u16,

    /// New row count
    pub rows: u16,
}

/// Parameters for `terminal-write`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteParams {
    /// Terminal to write to
    pub terminal_id: SessionId,

    /// Input text, typically keystrokes
    pub data: String,
}

/// Parameters for `terminal-close`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams {
    /// Terminal to close
    pub terminal_id: SessionId,

    /// Kill the shell outright instead of hanging up
    #[serde(default)]
    pub force: bool,
}

/// Parameters for `terminal-cd`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDirectoryParams {
    /// Terminal whose shell should change directory
    pub terminal_id: SessionId,

    /// Target directory
    pub directory: String,
}

/// Parameters for `terminal-execute`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    /// Terminal to type the command into
    pub terminal_id: SessionId,

    /// Command line, without terminator
    pub command: String,
}

/// Parameters for `terminal-list`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListParams {}

/// Response for `terminal-list`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListResponse {
    /// Live terminals ordered by id
    pub terminals: Vec<SessionInfo>,
}

/// Response for the fire-and-forget methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AckResponse {
    /// Whether the backend carried out the request
    pub success: bool,
}

/// JSON Schemas of every protocol message, keyed by name.
pub fn schemas() -> Value {
    serde_json::json!({
        "request": schema_for!(Request),
        "response": schema_for!(Response),
        "event": schema_for!(Event),
        "terminal-create": {
            "params": schema_for!(CreateParams),
            "result": schema_for!(CreateResponse),
        },
        "terminal-resize": {
            "params": schema_for!(ResizeParams),
            "result": schema_for!(AckResponse),
        },
        "terminal-write": {
            "params": schema_for!(WriteParams),
            "result": schema_for!(AckResponse),
        },
        "terminal-close": {
            "params": schema_for!(CloseParams),
            "result": schema_for!(AckResponse),
        },
        "terminal-cd": {
            "params": schema_for!(ChangeDirectoryParams),
            "result": schema_for!(AckResponse),
        },
        "terminal-execute": {
            "params": schema_for!(ExecuteParams),
            "result": schema_for!(AckResponse),
        },
        "terminal-list": {
            "params": schema_for!(ListParams),
            "result": schema_for!(ListResponse),
        },
    })
}
