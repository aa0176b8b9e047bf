//! Shell selection and advisory shell command text.
//!
//! [`ShellResolver`] is a pure function of the platform, an environment
//! snapshot and a file-existence probe. It never fails: when no preferred shell
//! is available it falls back to a hard-coded platform default.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use devterm_core::Platform;

/// Last-resort shell on Unix-like platforms.
const UNIX_FALLBACK_SHELL: &str = "/bin/sh";

/// Family of the resolved shell, which decides how command text is quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    /// POSIX-style shells (sh, bash, zsh, fish, ...)
    Posix,
    /// PowerShell (Windows PowerShell or PowerShell Core)
    PowerShell,
    /// Windows command processor
    Cmd,
}

impl ShellKind {
    /// Guess the shell family from its executable path or name.
    pub fn from_program(program: &str) -> Self {
        let name = program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(program)
            .to_ascii_lowercase();
        let stem = name.strip_suffix(".exe").unwrap_or(name.as_str());

        match stem {
            "pwsh" | "powershell" => ShellKind::PowerShell,
            "cmd" => ShellKind::Cmd,
            _ => ShellKind::Posix,
        }
    }

    /// Build a directory-change command line for this shell.
    ///
    /// The path is lexically normalised and quoted. The result is advisory: the
    /// shell may be busy running another program and never see it as a command.
    pub fn cd_command(&self, path: &Path, line_terminator: &str) -> String {
        let normalized = normalize_path(path);
        let path = normalized.to_string_lossy();

        let quoted = match self {
            ShellKind::Posix => escape_with(&path, '\\', &['\\', '"', '$', '`']),
            ShellKind::PowerShell => escape_with(&path, '`', &['`', '"', '$']),
            ShellKind::Cmd => path.replace('"', ""),
        };

        match self {
            ShellKind::Cmd => format!("cd /d \"{quoted}\"{line_terminator}"),
            _ => format!("cd \"{quoted}\"{line_terminator}"),
        }
    }
}

fn escape_with(text: &str, escape: char, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if special.contains(&ch) {
            out.push(escape);
        }
        out.push(ch);
    }
    out
}

/// Lexically normalise a path: drop `.` components and fold `..` into the
/// preceding component where one exists. The filesystem is never consulted.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Shell program and environment chosen for new sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    /// Executable path or name
    pub program: String,
    /// Arguments passed to the shell
    pub args: Vec<String>,
    /// Complete environment for the shell process
    pub env: Vec<(String, String)>,
    /// Shell family
    pub kind: ShellKind,
    /// Line terminator appended to injected command lines
    pub line_terminator: &'static str,
}

impl ResolvedShell {
    /// Look up a variable in the resolved environment.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Terminate a command string so the shell sees a complete line.
    pub fn command_line(&self, command: &str) -> String {
        format!("{command}{}", self.line_terminator)
    }

    /// Directory-change command line for this shell.
    pub fn cd_command(&self, path: &Path) -> String {
        self.kind.cd_command(path, self.line_terminator)
    }
}

/// Maps the host platform and environment to a shell and its environment.
#[derive(Clone)]
pub struct ShellResolver {
    platform: Platform,
    env: BTreeMap<String, String>,
    term: String,
    shell_override: Option<String>,
    shell_args: Vec<String>,
    exists: fn(&Path) -> bool,
}

impl std::fmt::Debug for ShellResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellResolver")
            .field("platform", &self.platform)
            .field("term", &self.term)
            .field("shell_override", &self.shell_override)
            .field("shell_args", &self.shell_args)
            .finish_non_exhaustive()
    }
}

impl ShellResolver {
    /// Create a resolver for an explicit platform and environment snapshot.
    pub fn new<I>(platform: Platform, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            platform,
            env: env.into_iter().collect(),
            term: "xterm-256color".to_string(),
            shell_override: None,
            shell_args: Vec::new(),
            exists: Path::exists,
        }
    }

    /// Create a resolver for the running host and its current environment.
    pub fn from_env() -> Self {
        Self::new(Platform::detect(), std::env::vars())
    }

    /// Set the advertised `TERM` value.
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Use a fixed shell program instead of detecting one.
    pub fn with_shell_override(mut self, shell: Option<String>) -> Self {
        self.shell_override = shell.filter(|s| !s.trim().is_empty());
        self
    }

    /// Arguments passed to every shell.
    pub fn with_shell_args(mut self, args: Vec<String>) -> Self {
        self.shell_args = args;
        self
    }

    /// Replace the file-existence probe used to vet candidate shells.
    pub fn with_exists_probe(mut self, exists: fn(&Path) -> bool) -> Self {
        self.exists = exists;
        self
    }

    /// Platform this resolver targets.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve the shell program and environment.
    pub fn resolve(&self) -> ResolvedShell {
        let program = if self.platform.is_windows() {
            self.windows_shell()
        } else {
            self.unix_shell()
        };

        ResolvedShell {
            kind: ShellKind::from_program(&program),
            program,
            args: self.shell_args.clone(),
            env: self.shell_env(),
            line_terminator: if self.platform.is_windows() { "\r\n" } else { "\n" },
        }
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn windows_shell(&self) -> String {
        if let Some(shell) = &self.shell_override {
            return shell.clone();
        }

        // Prefer PowerShell Core when installed
        if let Some(program_files) = self.var("ProgramFiles") {
            let pwsh = Path::new(program_files)
                .join("PowerShell")
                .join("7")
                .join("pwsh.exe");
            if (self.exists)(&pwsh) {
                return pwsh.to_string_lossy().into_owned();
            }
        }

        self.var("COMSPEC")
            .map(str::to_string)
            .unwrap_or_else(|| "powershell.exe".to_string())
    }

    fn unix_shell(&self) -> String {
        let platform_default = match self.platform {
            Platform::MacOS => "/bin/zsh",
            _ => "/bin/bash",
        };

        let candidates = self
            .shell_override
            .as_deref()
            .into_iter()
            .chain(self.var("SHELL"))
            .chain(std::iter::once(platform_default));

        for candidate in candidates {
            // Bare names are left to PATH lookup at spawn time
            if !candidate.contains('/') || (self.exists)(Path::new(candidate)) {
                return candidate.to_string();
            }
        }

        UNIX_FALLBACK_SHELL.to_string()
    }

    fn shell_env(&self) -> Vec<(String, String)> {
        let mut env = self.env.clone();

        env.insert("TERM".to_string(), self.term.clone());
        env.insert("COLORTERM".to_string(), "truecolor".to_string());

        if self.platform.is_windows() {
            env.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
            env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
        }

        env.into_iter().collect()
    }
}

impl Default for ShellResolver {
    fn default() -> Self {
        Self::from_env()
    }
}
