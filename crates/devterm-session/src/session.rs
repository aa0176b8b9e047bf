//! Terminal session entity.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::{debug, info};

use devterm_core::{Dimensions, Error, Result, SessionId, SessionInfo, SessionState};
use devterm_pty::{PtySession, ResolvedShell, TerminationMode};

/// One shell process plus its pseudoterminal, as tracked by the manager.
///
/// The session exclusively owns its [`PtySession`] until it enters
/// [`SessionState::Closed`], at which point the pty is released exactly once.
#[derive(Debug)]
pub struct Session {
    /// Session identifier
    id: SessionId,

    /// Shell the session was started with
    shell: ResolvedShell,

    /// Directory the shell was started in
    working_directory: PathBuf,

    /// Session creation time
    created_at: SystemTime,

    /// Lifecycle state; output forwarding is decided under this lock
    state: Mutex<SessionState>,

    /// Last applied terminal dimensions
    dimensions: Mutex<Dimensions>,

    /// Pseudoterminal, present until the session is closed
    pty: Mutex<Option<Arc<PtySession>>>,
}

impl Session {
    /// Wrap a freshly spawned pty. The session starts in `Starting`.
    pub fn new(
        id: SessionId,
        shell: ResolvedShell,
        working_directory: PathBuf,
        pty: PtySession,
    ) -> Self {
        let dimensions = pty.dimensions().unwrap_or_default();
        Self {
            id,
            shell,
            working_directory,
            created_at: SystemTime::now(),
            state: Mutex::new(SessionState::Starting),
            dimensions: Mutex::new(dimensions),
            pty: Mutex::new(Some(Arc::new(pty))),
        }
    }

    /// Session without a process, for exercising bookkeeping in tests.
    #[cfg(test)]
    pub(crate) fn detached(id: SessionId, program: &str) -> Self {
        use devterm_pty::ShellKind;

        Self {
            id,
            shell: ResolvedShell {
                program: program.to_string(),
                args: Vec::new(),
                env: Vec::new(),
                kind: ShellKind::from_program(program),
                line_terminator: "\n",
            },
            working_directory: PathBuf::from("/"),
            created_at: SystemTime::now(),
            state: Mutex::new(SessionState::Starting),
            dimensions: Mutex::new(Dimensions::default()),
            pty: Mutex::new(None),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Shell the session runs.
    pub fn shell(&self) -> &ResolvedShell {
        &self.shell
    }

    /// Directory the shell was started in.
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Get the session creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Last applied terminal dimensions.
    pub fn dimensions(&self) -> Dimensions {
        *lock(&self.dimensions)
    }

    /// Process id of the shell, while the session holds its pty.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.pty).as_ref().and_then(|pty| pty.pid())
    }

    /// Move the session forward to `next`.
    ///
    /// Returns false, leaving the state untouched, when `next` is not ahead of
    /// the current state.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if !state.can_advance_to(next) {
            return false;
        }
        debug!("Session {}: {} -> {}", self.id, *state, next);
        *state = next;
        true
    }

    /// Run `forward` only while the session is running.
    ///
    /// The state lock is held for the duration of `forward`, so once
    /// [`Session::advance`] to `Closing` has returned no further call runs.
    pub fn forward_if_live<F>(&self, forward: F) -> bool
    where
        F: FnOnce(),
    {
        let state = lock(&self.state);
        if !state.is_live() {
            return false;
        }
        forward();
        true
    }

    /// Write raw bytes to the shell's input.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.pty()?.write(data)
    }

    /// Inject a command line into the shell's input.
    pub fn execute(&self, command: &str) -> Result<usize> {
        self.write(self.shell.command_line(command).as_bytes())
    }

    /// Inject a directory change into the shell's input.
    ///
    /// Advisory: whether the shell acted on it is not observed.
    pub fn change_directory(&self, path: &Path) -> Result<usize> {
        self.write(self.shell.cd_command(path).as_bytes())
    }

    /// Resize the pseudoterminal.
    pub fn resize(&self, dimensions: Dimensions) -> Result<()> {
        let dimensions = dimensions.validate()?;
        self.pty()?.resize(dimensions)?;
        *lock(&self.dimensions) = dimensions;
        Ok(())
    }

    /// Request termination of the shell process.
    pub fn terminate(&self, mode: TerminationMode) -> Result<()> {
        match self.pty() {
            Ok(pty) => pty.terminate(mode),
            Err(_) => {
                debug!("Session {} already released, nothing to terminate", self.id);
                Ok(())
            }
        }
    }

    /// Whether the shell process is still running.
    pub fn is_alive(&self) -> bool {
        lock(&self.pty).as_ref().is_some_and(|pty| pty.is_alive())
    }

    /// Drop the pseudoterminal and enter `Closed`.
    ///
    /// The pty's reader thread is stopped even if a concurrent operation still
    /// holds the pty. Returns true only for the call that actually released
    /// the resources.
    pub fn release(&self) -> bool {
        let pty = lock(&self.pty).take();
        self.advance(SessionState::Closed);
        match pty {
            Some(pty) => {
                pty.release();
                info!("Session {} closed, pid={:?}", self.id, pty.pid());
                true
            }
            None => false,
        }
    }

    /// Snapshot for listings and diagnostics.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            shell: self.shell.program.clone(),
            dimensions: self.dimensions(),
            working_directory: self.working_directory.clone(),
            state: self.state(),
            created_at: self.created_at,
        }
    }

    fn pty(&self) -> Result<Arc<PtySession>> {
        lock(&self.pty).clone().ok_or(Error::SessionTerminated)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::detached(SessionId::new(7), "/bin/bash")
    }

    #[test]
    fn test_session_starts_in_starting() {
        let session = session();
        assert_eq!(session.id(), SessionId::new(7));
        assert_eq!(session.state(), SessionState::Starting);
        assert!(!session.is_alive());
    }

    #[test]
    fn test_advance_is_forward_only() {
        let session = session();
        assert!(session.advance(SessionState::Running));
        assert!(session.advance(SessionState::Closing));
        assert!(!session.advance(SessionState::Running));
        assert!(!session.advance(SessionState::Closing));
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn test_forward_only_while_running() {
        let session = session();
        let mut forwarded = 0;

        assert!(!session.forward_if_live(|| forwarded += 1));
        session.advance(SessionState::Running);
        assert!(session.forward_if_live(|| forwarded += 1));
        session.advance(SessionState::Closing);
        assert!(!session.forward_if_live(|| forwarded += 1));

        assert_eq!(forwarded, 1);
    }

    #[test]
    fn test_io_without_pty_is_terminated() {
        let session = session();
        assert!(matches!(session.write(b"ls\n"), Err(Error::SessionTerminated)));
        assert!(matches!(session.execute("ls"), Err(Error::SessionTerminated)));
        assert!(matches!(
            session.resize(Dimensions::new(40, 120)),
            Err(Error::SessionTerminated)
        ));
        assert!(session.terminate(TerminationMode::Forced).is_ok());
    }

    #[test]
    fn test_resize_rejects_zero_before_touching_pty() {
        let session = session();
        assert!(matches!(
            session.resize(Dimensions::new(0, 0)),
            Err(Error::InvalidDimensions { rows: 0, cols: 0 })
        ));
        assert_eq!(session.dimensions(), Dimensions::default());
    }

    #[test]
    fn test_release_enters_closed() {
        let session = session();
        session.advance(SessionState::Running);
        assert!(!session.release());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.advance(SessionState::Closing));
    }

    #[test]
    fn test_info_snapshot() {
        let session = session();
        let info = session.info();
        assert_eq!(info.id, SessionId::new(7));
        assert_eq!(info.shell, "/bin/bash");
        assert_eq!(info.dimensions, Dimensions::default());
        assert_eq!(info.working_directory, PathBuf::from("/"));
        assert_eq!(info.state, SessionState::Starting);
    }

    #[cfg(unix)]
    #[test]
    fn test_release_drops_pty_once() {
        use devterm_pty::PtySpawnSpec;

        let spec = PtySpawnSpec::new("/bin/sh", Dimensions::new(30, 100));
        let (pty, _events) = PtySession::spawn(&spec).unwrap();
        let shell = ResolvedShell {
            program: "/bin/sh".to_string(),
            args: Vec::new(),
            env: Vec::new(),
            kind: devterm_pty::ShellKind::Posix,
            line_terminator: "\n",
        };
        let session = Session::new(SessionId::new(1), shell, PathBuf::from("/"), pty);

        assert_eq!(session.dimensions(), Dimensions::new(30, 100));
        assert!(session.pid().is_some());
        assert!(session.is_alive());

        session.terminate(TerminationMode::Forced).unwrap();
        assert!(session.release());
        assert!(!session.release());
        assert!(session.pid().is_none());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
