//! Host platform detection.
//!
//! Shell selection and command-line termination differ per platform, so the
//! platform is detected once and passed around as a plain value. That keeps
//! shell resolution testable for every platform from any host.

use serde::{Deserialize, Serialize};

/// Platforms the backend knows how to pick a shell for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux, WSL and other Unix-likes
    Linux,
    /// macOS, where the login shell defaults to zsh
    MacOS,
    /// Native Windows
    Windows,
}

impl Platform {
    /// Platform the backend was compiled for.
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    /// Check if processes are native Windows processes (ConPTY, `\r\n` input).
    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detect() {
        let platform = Platform::detect();
        assert_eq!(platform.is_windows(), cfg!(windows));
        if cfg!(target_os = "macos") {
            assert_eq!(platform, Platform::MacOS);
        }
    }

    #[test]
    fn test_only_windows_is_windows() {
        assert!(Platform::Windows.is_windows());
        assert!(!Platform::MacOS.is_windows());
        assert!(!Platform::Linux.is_windows());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Platform::MacOS).unwrap(), "\"macos\"");
        let parsed: Platform = serde_json::from_str("\"windows\"").unwrap();
        assert_eq!(parsed, Platform::Windows);
    }
}
