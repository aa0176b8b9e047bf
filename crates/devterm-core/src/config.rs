//! Configuration types for the devterm backend.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Dimensions, Error};

/// Server configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Terminal settings
    pub terminal: TerminalSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be > 0".to_string()));
        }

        if !self.terminal.default_dimensions().is_valid() {
            return Err(Error::Config("terminal dimensions must be > 0".to_string()));
        }

        if self.terminal.term.trim().is_empty() {
            return Err(Error::Config("terminal.term cannot be empty".to_string()));
        }

        if let Some(shell) = &self.terminal.shell {
            if shell.trim().is_empty() {
                return Err(Error::Config(
                    "terminal.shell cannot be empty when set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            log_level: "info".to_string(),
        }
    }
}

/// Terminal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Default terminal rows
    pub default_rows: u16,
    /// Default terminal columns
    pub default_cols: u16,
    /// TERM environment variable value
    pub term: String,
    /// Shell override; detected from the platform when unset
    pub shell: Option<String>,
    /// Extra arguments passed to the shell
    pub shell_args: Vec<String>,
    /// Grace period before a gracefully closed session is killed outright
    pub close_grace_ms: u64,
}

impl TerminalSettings {
    /// Default dimensions for new sessions.
    pub fn default_dimensions(&self) -> Dimensions {
        Dimensions::new(self.default_rows, self.default_cols)
    }
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            default_rows: 24,
            default_cols: 80,
            term: "xterm-256color".to_string(),
            shell: None,
            shell_args: vec![],
            close_grace_ms: 2000,
        }
    }
}
