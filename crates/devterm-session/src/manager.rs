//! Session manager coordinating every terminal session of the backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use devterm_core::{
    Dimensions, Error, ExitStatus, Result, ServerConfig, SessionEvent, SessionId, SessionInfo,
    SessionState,
};
use devterm_pty::{PtyEvent, PtyEvents, PtySession, PtySpawnSpec, ShellResolver, TerminationMode};

use crate::events::EventSink;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Configuration for session manager.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Dimensions used when a create request leaves them out
    pub default_dimensions: Dimensions,

    /// How long a gracefully closed shell may take before it is killed
    pub close_grace: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            default_dimensions: Dimensions::default(),
            close_grace: Duration::from_secs(2),
        }
    }
}

impl From<&ServerConfig> for SessionManagerConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_sessions: config.server.max_sessions,
            default_dimensions: config.terminal.default_dimensions(),
            close_grace: Duration::from_millis(config.terminal.close_grace_ms),
        }
    }
}

/// Owns every terminal session and routes their events to the UI channel.
///
/// Addressed operations other than [`TerminalSessionManager::create`] never
/// fail loudly: an unknown id or an I/O error on a closing session yields
/// `false` and a log line, so rapid keystroke and resize traffic racing a
/// close cannot take the caller down.
pub struct TerminalSessionManager {
    registry: Arc<SessionRegistry>,
    resolver: ShellResolver,
    sink: Arc<dyn EventSink>,
    config: SessionManagerConfig,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for TerminalSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSessionManager")
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .field("config", &self.config)
            .field("shutting_down", &self.shutting_down)
            .finish_non_exhaustive()
    }
}

impl TerminalSessionManager {
    /// Create a manager with its own registry.
    pub fn new(
        config: SessionManagerConfig,
        resolver: ShellResolver,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_registry(Arc::new(SessionRegistry::new()), config, resolver, sink)
    }

    /// Create a manager around an existing registry.
    pub fn with_registry(
        registry: Arc<SessionRegistry>,
        config: SessionManagerConfig,
        resolver: ShellResolver,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            resolver,
            sink,
            config,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Create a manager from the server configuration and the process environment.
    pub fn from_server_config(config: &ServerConfig, sink: Arc<dyn EventSink>) -> Self {
        let resolver = ShellResolver::from_env()
            .with_term(config.terminal.term.clone())
            .with_shell_override(config.terminal.shell.clone())
            .with_shell_args(config.terminal.shell_args.clone());
        Self::new(SessionManagerConfig::from(config), resolver, sink)
    }

    /// Registry backing this manager.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start a new shell session.
    ///
    /// Missing or zero sizes fall back to the configured defaults and a
    /// missing directory to the user's home. The id is allocated only once
    /// the shell is running, so a failed spawn never consumes one. A session
    /// refused because shutdown began mid-spawn emits no events at all.
    pub async fn create(
        &self,
        cols: Option<u16>,
        rows: Option<u16>,
        cwd: Option<PathBuf>,
    ) -> Result<SessionId> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        // Check session limit
        if self.registry.len() >= self.config.max_sessions {
            warn!(
                "Refusing to create session: limit of {} reached",
                self.config.max_sessions
            );
            return Err(Error::SessionLimitReached(self.config.max_sessions));
        }

        let dimensions = Dimensions::or_default_from(cols, rows, self.config.default_dimensions);
        let working_directory = cwd
            .filter(|dir| !dir.as_os_str().is_empty())
            .or_else(dirs::home_dir);
        let shell = self.resolver.resolve();

        info!(
            "Creating session: shell='{}', dimensions={}, cwd={:?}",
            shell.program, dimensions, working_directory
        );

        let spec = PtySpawnSpec::from_shell(&shell, dimensions, working_directory.clone());
        let (pty, events) = tokio::task::spawn_blocking(move || PtySession::spawn(&spec))
            .await
            .map_err(|e| Error::Spawn(format!("Spawn task failed: {e}")))??;

        let id = self.registry.allocate();
        let session = Arc::new(Session::new(
            id,
            shell,
            working_directory.unwrap_or_default(),
            pty,
        ));

        if let Err(e) = self.registry.put(Arc::clone(&session)) {
            error!("Failed to register session {}: {}", id, e);
            discard(&session);
            return Err(e);
        }

        // A shutdown that swept the registry before we registered missed us.
        // Nothing has been forwarded yet, so the id never surfaces.
        if self.is_shutting_down() {
            warn!("Session {} created during shutdown, terminating", id);
            self.registry.remove(id);
            discard(&session);
            return Err(Error::ShuttingDown);
        }

        session.advance(SessionState::Running);
        tokio::spawn(forward_events(
            Arc::clone(&session),
            events,
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
        ));

        info!("Session created successfully: id={}, pid={:?}", id, session.pid());
        Ok(id)
    }

    /// Resize a session's terminal.
    ///
    /// Returns false for unknown ids, zero sizes and OS failures.
    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> bool {
        let Some(session) = self.lookup(id, "resize") else {
            return false;
        };

        match session.resize(Dimensions::new(rows, cols)) {
            Ok(()) => {
                debug!("Session {} resized to {}x{}", id, cols, rows);
                true
            }
            Err(e) => {
                warn!("Failed to resize session {} to {}x{}: {}", id, cols, rows, e);
                false
            }
        }
    }

    /// Forward raw input bytes to a session.
    pub fn write(&self, id: SessionId, data: &[u8]) -> bool {
        let Some(session) = self.lookup(id, "write") else {
            return false;
        };

        match session.write(data) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to write to session {}: {}", id, e);
                false
            }
        }
    }

    /// Gracefully close a session. Idempotent: later calls return false.
    pub fn close(&self, id: SessionId) -> bool {
        self.close_with(id, TerminationMode::Graceful)
    }

    /// Close a session with an explicit termination mode.
    ///
    /// The session is deregistered and stops forwarding output before this
    /// returns; its exit event follows once the process is gone.
    pub fn close_with(&self, id: SessionId, mode: TerminationMode) -> bool {
        let Some(session) = self.registry.remove(id) else {
            debug!("Close of unknown session {}", id);
            return false;
        };

        info!("Closing session {} ({:?})", id, mode);
        session.advance(SessionState::Closing);

        if let Err(e) = session.terminate(mode) {
            warn!("Failed to terminate session {}: {}", id, e);
        }

        if mode == TerminationMode::Graceful {
            self.schedule_forced_kill(session);
        }

        true
    }

    /// Ask the session's shell to change directory.
    ///
    /// Advisory: the command is typed into the shell and not verified.
    pub fn change_directory(&self, id: SessionId, path: &Path) -> bool {
        let Some(session) = self.lookup(id, "change directory") else {
            return false;
        };

        match session.change_directory(path) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to change directory in session {}: {}", id, e);
                false
            }
        }
    }

    /// Type a command line into the session's shell.
    pub fn execute(&self, id: SessionId, command: &str) -> bool {
        let Some(session) = self.lookup(id, "execute") else {
            return false;
        };

        match session.execute(command) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to execute command in session {}: {}", id, e);
                false
            }
        }
    }

    /// Terminate every session and empty the registry.
    ///
    /// Never waits for the processes to exit and never fails; sessions that
    /// are already exiting are swept like any other. New sessions are refused
    /// from here on.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let sessions = self.registry.drain();
        info!("Shutting down {} session(s)", sessions.len());

        for session in sessions {
            session.advance(SessionState::Closing);
            if let Err(e) = session.terminate(TerminationMode::Forced) {
                warn!("Failed to terminate session {} during shutdown: {}", session.id(), e);
            }
        }
    }

    /// Whether [`TerminalSessionManager::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// List all live sessions, ordered by id.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.registry.snapshot().iter().map(|s| s.info()).collect()
    }

    /// Describe one live session.
    pub fn info(&self, id: SessionId) -> Result<SessionInfo> {
        self.registry
            .get(id)
            .map(|s| s.info())
            .ok_or(Error::SessionNotFound(id))
    }

    /// Get the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    fn lookup(&self, id: SessionId, operation: &str) -> Option<Arc<Session>> {
        let session = self.registry.get(id);
        if session.is_none() {
            debug!("Cannot {}: session {} not found", operation, id);
        }
        session
    }

    fn schedule_forced_kill(&self, session: Arc<Session>) {
        let grace = self.config.close_grace;
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime to schedule forced kill of session {}", session.id());
            return;
        };

        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            if session.is_alive() {
                warn!(
                    "Session {} still running {:?} after close, killing",
                    session.id(),
                    grace
                );
                if let Err(e) = session.terminate(TerminationMode::Forced) {
                    warn!("Failed to kill session {}: {}", session.id(), e);
                }
            }
        });
    }
}

/// Kill a session that was never handed out. Its pty events are dropped unread.
fn discard(session: &Session) {
    session.advance(SessionState::Closing);
    if let Err(e) = session.terminate(TerminationMode::Forced) {
        warn!("Failed to terminate session {}: {}", session.id(), e);
    }
    session.release();
}

/// Pump one session's pty events into the sink until the process exits.
///
/// Output is forwarded only while the session is running. On exit the session
/// is deregistered (if a close has not done so already), released and its
/// single exit event emitted.
async fn forward_events(
    session: Arc<Session>,
    mut events: PtyEvents,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EventSink>,
) {
    let id = session.id();
    let mut status = None;

    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Output(data) => {
                trace!("Session {}: {} bytes of output", id, data.len());
                let forwarded =
                    session.forward_if_live(|| sink.emit(SessionEvent::Output { id, data }));
                if !forwarded {
                    trace!("Session {} no longer live, dropping output", id);
                }
            }
            PtyEvent::Exit(exit) => {
                status = Some(exit);
                break;
            }
        }
    }

    let status = status.unwrap_or_else(|| {
        warn!("Session {} event stream ended without an exit status", id);
        ExitStatus::unknown()
    });

    registry.remove(id);
    session.advance(SessionState::Closing);
    session.release();

    info!(
        "Session {} exited: code={}, signal={:?}",
        id, status.exit_code, status.signal
    );
    sink.emit(SessionEvent::Exit { id, status });
}
