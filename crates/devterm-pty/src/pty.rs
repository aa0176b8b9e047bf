//! PTY (Pseudo-Terminal) handling with portable-pty.
//!
//! A [`PtySession`] owns one shell process attached to a pseudoterminal.
//! Output and the final exit notification are not delivered through callbacks:
//! [`PtySession::spawn`] hands back a [`PtyEvents`] receiver fed by two
//! dedicated threads.
//!
//! - the reader thread pumps the master side and posts [`PtyEvent::Output`]
//!   chunks in the order the process wrote them;
//! - the waiter thread reaps the child, gives the reader a short window to
//!   drain what the process wrote before dying, then posts exactly one
//!   [`PtyEvent::Exit`].
//!
//! Background jobs of the shell can keep the slave side open long after the
//! shell itself is gone, so the reader never relies on EOF alone. On Unix it
//! polls its descriptor and stops within [`READ_POLL_INTERVAL`] of
//! [`PtySession::release`] or the session being dropped.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use devterm_core::{Dimensions, Error, ExitStatus, Result};

use crate::shell::ResolvedShell;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long the exit notification waits for trailing output to be drained.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Upper bound on how long the reader blocks before rechecking for release.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(unix)]
type OutputReader = std::fs::File;

#[cfg(not(unix))]
type OutputReader = Box<dyn Read + Send>;

/// Everything needed to start a process on a new pseudoterminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtySpawnSpec {
    /// Program to execute (path or name looked up on PATH)
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Complete environment; when empty the backend's own environment is inherited
    pub env: Vec<(String, String)>,
    /// Working directory; the user's home directory when unset or missing
    pub cwd: Option<PathBuf>,
    /// Initial terminal dimensions
    pub dimensions: Dimensions,
}

impl PtySpawnSpec {
    /// Launch a bare program with the inherited environment.
    pub fn new(program: impl Into<String>, dimensions: Dimensions) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            dimensions,
        }
    }

    /// Launch a resolved shell with its environment.
    pub fn from_shell(shell: &ResolvedShell, dimensions: Dimensions, cwd: Option<PathBuf>) -> Self {
        Self {
            program: shell.program.clone(),
            args: shell.args.clone(),
            env: shell.env.clone(),
            cwd,
            dimensions,
        }
    }

    /// Set program arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Something that happened on a pseudoterminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of raw bytes written by the process
    Output(Vec<u8>),
    /// The process terminated; always the last event that matters
    Exit(ExitStatus),
}

/// Receiving end of a PTY's output and exit notifications.
#[derive(Debug)]
pub struct PtyEvents {
    rx: mpsc::UnboundedReceiver<PtyEvent>,
}

impl PtyEvents {
    /// Wait for the next event. Returns `None` once both I/O threads finished.
    pub async fn recv(&mut self) -> Option<PtyEvent> {
        self.rx.recv().await
    }

    /// Blocking variant of [`PtyEvents::recv`] for use outside the runtime.
    pub fn blocking_recv(&mut self) -> Option<PtyEvent> {
        self.rx.blocking_recv()
    }
}

/// How hard [`PtySession::terminate`] pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TerminationMode {
    /// Hang up the terminal (SIGHUP on Unix), letting the shell clean up
    #[default]
    Graceful,
    /// Kill the process outright (SIGKILL on Unix)
    Forced,
}

/// One shell process attached to a pseudoterminal.
pub struct PtySession {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    dimensions: Mutex<Dimensions>,
    /// Set by the waiter before it reaps the child; signals are sent under this lock
    exited: Arc<Mutex<bool>>,
    released: Arc<AtomicBool>,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("pid", &self.pid)
            .field("dimensions", &self.dimensions)
            .field("exited", &self.exited)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl PtySession {
    /// Spawn a new process on a fresh pseudoterminal.
    ///
    /// Fails with [`Error::Spawn`] when no pseudoterminal can be allocated or
    /// the program cannot be started, and with [`Error::InvalidDimensions`]
    /// for zero-sized terminals.
    ///
    /// # Example
    /// ```no_run
    /// use devterm_core::Dimensions;
    /// use devterm_pty::{PtySession, PtySpawnSpec};
    ///
    /// # fn example() -> devterm_core::Result<()> {
    /// let spec = PtySpawnSpec::new("/bin/sh", Dimensions::new(24, 80));
    /// let (pty, mut events) = PtySession::spawn(&spec)?;
    /// pty.write(b"echo hello\n")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(spec: &PtySpawnSpec) -> Result<(Self, PtyEvents)> {
        info!(
            "Spawning PTY: program='{}' args={:?}, dimensions={}, cwd={:?}",
            spec.program, spec.args, spec.dimensions, spec.cwd
        );

        let dimensions = spec.dimensions.validate()?;

        debug!("Opening PTY with native system");
        let pair = native_pty_system()
            .openpty(to_pty_size(dimensions))
            .map_err(|e| {
                error!("Failed to open PTY: {}", e);
                Error::Spawn(format!("Failed to open PTY: {e}"))
            })?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);

        if !spec.env.is_empty() {
            cmd.env_clear();
            for (key, value) in &spec.env {
                cmd.env(key, value);
            }
        }

        if let Some(dir) = &spec.cwd {
            debug!("Setting working directory to: {}", dir.display());
            cmd.cwd(dir);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", spec.program, e);
            Error::Spawn(format!("Failed to spawn command '{}': {e}", spec.program))
        })?;

        // Our copy of the slave would keep the reader from ever seeing EOF
        drop(pair.slave);

        let pid = child.process_id();
        let mut killer = child.clone_killer();

        let streams = open_reader(&*pair.master).map_err(|e| e.to_string()).and_then(|reader| {
            pair.master
                .take_writer()
                .map(|writer| (reader, writer))
                .map_err(|e| e.to_string())
        });
        let (reader, writer) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                error!("Failed to open PTY streams: {}", e);
                let _ = killer.kill();
                return Err(Error::Spawn(format!("Failed to open PTY streams: {e}")));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (drained_tx, drained_rx) = std_mpsc::channel();
        let exited = Arc::new(Mutex::new(false));
        let released = Arc::new(AtomicBool::new(false));

        let started = spawn_reader(reader, Arc::clone(&released), tx.clone(), drained_tx, pid)
            .and_then(|()| spawn_waiter(child, tx, drained_rx, Arc::clone(&exited), pid));
        if let Err(e) = started {
            error!("Failed to start PTY I/O threads: {}", e);
            released.store(true, Ordering::Release);
            let _ = killer.kill();
            return Err(Error::Spawn(format!("Failed to start PTY I/O threads: {e}")));
        }

        info!("PTY spawned successfully: program='{}', pid={:?}", spec.program, pid);

        Ok((
            Self {
                master: Mutex::new(pair.master),
                writer: Mutex::new(writer),
                killer: Mutex::new(killer),
                pid,
                dimensions: Mutex::new(dimensions),
                exited,
                released,
            },
            PtyEvents { rx },
        ))
    }

    /// Write data to the process's input.
    ///
    /// Fails with [`Error::SessionTerminated`] once the process has exited.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.is_alive() {
            return Err(Error::SessionTerminated);
        }

        debug!("Writing {} bytes to PTY", data.len());
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| Error::PtyError(format!("Lock error: {e}")))?;

        writer.write_all(data).map_err(Error::Io)?;
        writer.flush().map_err(Error::Io)?;

        Ok(data.len())
    }

    /// Resize the PTY to new dimensions.
    ///
    /// The attached program receives the OS window-change notification.
    pub fn resize(&self, new_dimensions: Dimensions) -> Result<()> {
        let new_dimensions = new_dimensions.validate()?;
        if !self.is_alive() {
            return Err(Error::SessionTerminated);
        }

        info!("Resizing PTY to {}", new_dimensions);

        let master = self
            .master
            .lock()
            .map_err(|e| Error::PtyError(format!("Lock error: {e}")))?;
        master
            .resize(to_pty_size(new_dimensions))
            .map_err(|e| Error::PtyError(format!("Resize failed: {e}")))?;

        let mut dims = self
            .dimensions
            .lock()
            .map_err(|e| Error::PtyError(format!("Lock error: {e}")))?;
        *dims = new_dimensions;

        Ok(())
    }

    /// Request termination of the process.
    ///
    /// Returns as soon as the request is issued; the exit itself is reported
    /// through [`PtyEvent::Exit`]. Calling this after the process exited is a
    /// no-op.
    pub fn terminate(&self, mode: TerminationMode) -> Result<()> {
        // The waiter cannot reap the child, freeing its pid, while this is held
        let exited = lock_flag(&self.exited);
        if *exited {
            debug!("PTY process already exited, nothing to terminate: pid={:?}", self.pid);
            return Ok(());
        }

        info!("Terminating PTY process: pid={:?}, mode={:?}", self.pid, mode);

        let result = match mode {
            TerminationMode::Graceful => self.hang_up(),
            TerminationMode::Forced => self.force_kill(),
        };
        drop(exited);

        match result {
            Ok(()) => Ok(()),
            Err(e) if !self.is_alive() || is_already_gone(&e) => {
                debug!("PTY process exited while terminating: {}", e);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to terminate PTY process {:?}: {}", self.pid, e);
                Err(Error::PtyError(format!("Kill failed: {e}")))
            }
        }
    }

    /// Stop the reader thread and let go of the pseudoterminal.
    ///
    /// Output still in flight is discarded. The process itself is not
    /// signalled; use [`PtySession::terminate`] for that. Dropping the
    /// session has the same effect.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            debug!("Releasing PTY: pid={:?}", self.pid);
        }
    }

    /// Process id of the child, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Get current PTY dimensions.
    pub fn dimensions(&self) -> Result<Dimensions> {
        let dims = self
            .dimensions
            .lock()
            .map_err(|e| Error::PtyError(format!("Lock error: {e}")))?;
        Ok(*dims)
    }

    /// Check if the child process is still running.
    pub fn is_alive(&self) -> bool {
        !*lock_flag(&self.exited)
    }

    fn hang_up(&self) -> std::io::Result<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|e| std::io::Error::new(ErrorKind::Other, format!("Lock error: {e}")))?;
        killer.kill()
    }

    #[cfg(unix)]
    fn force_kill(&self) -> std::io::Result<()> {
        let Some(pid) = self.pid else {
            return self.hang_up();
        };

        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn force_kill(&self) -> std::io::Result<()> {
        // TerminateProcess is already unconditional
        self.hang_up()
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock_flag(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_pty_size(dimensions: Dimensions) -> PtySize {
    PtySize {
        rows: dimensions.rows,
        cols: dimensions.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[cfg(unix)]
fn is_already_gone(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn is_already_gone(error: &std::io::Error) -> bool {
    error.kind() == ErrorKind::NotFound
}

fn exit_status_from(status: &portable_pty::ExitStatus) -> ExitStatus {
    ExitStatus {
        exit_code: status.exit_code() as i32,
        signal: status.signal().map(str::to_string),
    }
}

/// Private duplicate of the master descriptor for the reader thread.
#[cfg(unix)]
fn open_reader(master: &(dyn MasterPty + Send)) -> std::io::Result<OutputReader> {
    use std::os::fd::FromRawFd;

    let fd = master.as_raw_fd().ok_or_else(|| {
        std::io::Error::new(ErrorKind::Unsupported, "PTY master has no file descriptor")
    })?;

    // SAFETY: `fd` stays open for as long as `master` is borrowed
    let duplicate = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if duplicate < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `duplicate` is a fresh descriptor nothing else owns
    Ok(unsafe { std::fs::File::from_raw_fd(duplicate) })
}

#[cfg(not(unix))]
fn open_reader(master: &(dyn MasterPty + Send)) -> std::io::Result<OutputReader> {
    master
        .try_clone_reader()
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))
}

/// Wait up to `timeout` for the master to become readable or hang up.
#[cfg(unix)]
fn wait_readable(reader: &OutputReader, timeout: Duration) -> std::io::Result<bool> {
    use std::os::fd::AsRawFd;

    let mut poll_fd = libc::pollfd {
        fd: reader.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd, owned by this frame
    let rc = unsafe { libc::poll(&mut poll_fd, 1, timeout.as_millis() as libc::c_int) };
    match rc {
        -1 => Err(std::io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(true),
    }
}

#[cfg(not(unix))]
fn wait_readable(_reader: &OutputReader, _timeout: Duration) -> std::io::Result<bool> {
    // ConPTY pipes cannot be polled; release is noticed after the next read
    Ok(true)
}

/// Block until the child has exited without reaping it, so its pid stays reserved.
///
/// Returns false when the exit could not be observed this way.
#[cfg(unix)]
fn wait_for_exit(pid: Option<u32>) -> bool {
    let Some(pid) = pid else {
        return false;
    };

    loop {
        // SAFETY: siginfo_t is plain data and waitid only writes into it
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return true;
        }
        let e = std::io::Error::last_os_error();
        if e.kind() != ErrorKind::Interrupted {
            debug!("waitid on PTY process {} failed: {}", pid, e);
            return false;
        }
    }
}

#[cfg(not(unix))]
fn wait_for_exit(_pid: Option<u32>) -> bool {
    false
}

fn spawn_reader(
    mut reader: OutputReader,
    released: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<PtyEvent>,
    drained: std_mpsc::Sender<()>,
    pid: Option<u32>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-reader-{}", pid.unwrap_or_default()))
        .spawn(move || {
            let mut buffer = [0u8; READ_CHUNK_SIZE];
            loop {
                if released.load(Ordering::Acquire) {
                    debug!("PTY released, stopping reader");
                    break;
                }

                match wait_readable(&reader, READ_POLL_INTERVAL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("PTY poll failed, stopping reader: {}", e);
                        break;
                    }
                }

                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("PTY EOF reached, stopping reader");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY reader: read {} bytes", n);
                        if tx.send(PtyEvent::Output(buffer[..n].to_vec())).is_err() {
                            debug!("PTY reader: receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                        continue
                    }
                    Err(e) => {
                        // Linux reports EIO once every slave descriptor is closed
                        debug!("PTY reader stopped: {}", e);
                        break;
                    }
                }
            }
            let _ = drained.send(());
        })?;
    Ok(())
}

fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    tx: mpsc::UnboundedSender<PtyEvent>,
    drained: std_mpsc::Receiver<()>,
    exited: Arc<Mutex<bool>>,
    pid: Option<u32>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-waiter-{}", pid.unwrap_or_default()))
        .spawn(move || {
            if wait_for_exit(pid) {
                *lock_flag(&exited) = true;
            }

            let status = match child.wait() {
                Ok(status) => exit_status_from(&status),
                Err(e) => {
                    warn!("Failed to wait for PTY process {:?}: {}", pid, e);
                    ExitStatus::unknown()
                }
            };
            *lock_flag(&exited) = true;
            info!(
                "PTY process exited: pid={:?}, code={}, signal={:?}",
                pid, status.exit_code, status.signal
            );

            if drained.recv_timeout(EXIT_DRAIN_GRACE).is_err() {
                debug!("PTY output still open after exit, reporting exit anyway");
            }
            let _ = tx.send(PtyEvent::Exit(status));
        })?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::shell::ShellResolver;
    use devterm_core::Platform;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Exits at once, leaving a job that ignores the hang-up holding the terminal.
    const LINGERING_JOB: &str = "(trap '' HUP; exec sleep 20) & exit 0";

    fn sh(dimensions: Dimensions) -> PtySpawnSpec {
        PtySpawnSpec::new("/bin/sh", dimensions)
    }

    /// Collect output until `needle` shows up or an exit arrives.
    async fn output_until(events: &mut PtyEvents, needle: &str) -> (String, Option<ExitStatus>) {
        let mut output = Vec::new();
        let deadline = tokio::time::Instant::now() + TIMEOUT;

        loop {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("timed out waiting for PTY output");
            match event {
                Some(PtyEvent::Output(bytes)) => {
                    output.extend_from_slice(&bytes);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        return (String::from_utf8_lossy(&output).into_owned(), None);
                    }
                }
                Some(PtyEvent::Exit(status)) => {
                    return (String::from_utf8_lossy(&output).into_owned(), Some(status));
                }
                None => return (String::from_utf8_lossy(&output).into_owned(), None),
            }
        }
    }

    /// Drain every remaining event, returning the exit statuses seen.
    async fn drain_exits(events: &mut PtyEvents) -> Vec<ExitStatus> {
        let mut exits = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(TIMEOUT, events.recv()).await {
            if let PtyEvent::Exit(status) = event {
                exits.push(status);
            }
        }
        exits
    }

    #[tokio::test]
    async fn test_pty_spawn() {
        let (pty, _events) = PtySession::spawn(&sh(Dimensions::new(24, 80))).unwrap();
        assert!(pty.is_alive());
        assert!(pty.pid().is_some());
        assert_eq!(pty.dimensions().unwrap(), Dimensions::new(24, 80));
        pty.terminate(TerminationMode::Forced).unwrap();
    }

    #[tokio::test]
    async fn test_pty_write_and_read() {
        let (pty, mut events) = PtySession::spawn(&sh(Dimensions::new(24, 80))).unwrap();

        pty.write(b"echo pty_marker_$((20 + 22))\n").unwrap();

        let (output, exit) = output_until(&mut events, "pty_marker_42").await;
        assert!(exit.is_none());
        assert!(output.contains("pty_marker_42"));

        pty.terminate(TerminationMode::Forced).unwrap();
    }

    #[tokio::test]
    async fn test_pty_resize() {
        let (pty, _events) = PtySession::spawn(&sh(Dimensions::new(24, 80))).unwrap();

        pty.resize(Dimensions::new(40, 120)).unwrap();
        assert_eq!(pty.dimensions().unwrap(), Dimensions::new(40, 120));

        let result = pty.resize(Dimensions::new(0, 0));
        assert!(matches!(result, Err(Error::InvalidDimensions { .. })));
        assert_eq!(pty.dimensions().unwrap(), Dimensions::new(40, 120));

        pty.terminate(TerminationMode::Forced).unwrap();
    }

    #[tokio::test]
    async fn test_pty_resize_reaches_program() {
        let (pty, mut events) = PtySession::spawn(&sh(Dimensions::new(24, 80))).unwrap();

        pty.resize(Dimensions::new(33, 111)).unwrap();
        pty.write(b"stty size\n").unwrap();

        let (output, _) = output_until(&mut events, "33 111").await;
        assert!(output.contains("33 111"));

        pty.terminate(TerminationMode::Forced).unwrap();
    }

    #[tokio::test]
    async fn test_natural_exit_reports_code_once() {
        let spec = sh(Dimensions::default()).with_args(["-c", "echo bye; exit 3"]);
        let (pty, mut events) = PtySession::spawn(&spec).unwrap();

        let exits = drain_exits(&mut events).await;
        assert_eq!(exits, vec![ExitStatus::with_code(3)]);
        assert!(!pty.is_alive());
    }

    #[tokio::test]
    async fn test_output_precedes_exit() {
        let spec = sh(Dimensions::default()).with_args(["-c", "echo last_words"]);
        let (_pty, mut events) = PtySession::spawn(&spec).unwrap();

        let (output, exit) = output_until(&mut events, "last_words").await;
        assert!(output.contains("last_words"));
        assert!(exit.is_none(), "exit must not overtake output");
    }

    #[tokio::test]
    async fn test_pty_terminate_is_idempotent() {
        let (pty, mut events) = PtySession::spawn(&sh(Dimensions::default())).unwrap();

        pty.terminate(TerminationMode::Graceful).unwrap();
        let exits = drain_exits(&mut events).await;
        assert_eq!(exits.len(), 1);
        assert!(!exits[0].success());

        assert!(!pty.is_alive());
        assert!(pty.terminate(TerminationMode::Graceful).is_ok());
        assert!(pty.terminate(TerminationMode::Forced).is_ok());
    }

    #[tokio::test]
    async fn test_forced_terminate() {
        let (pty, mut events) = PtySession::spawn(&sh(Dimensions::default())).unwrap();
        // Ignore hang-ups so only the forced kill can end it
        pty.write(b"trap '' HUP\n").unwrap();

        pty.terminate(TerminationMode::Forced).unwrap();
        let exits = drain_exits(&mut events).await;
        assert_eq!(exits.len(), 1);
        assert!(!exits[0].success());
    }

    /// Wait for the exit event, skipping output.
    async fn exit_of(events: &mut PtyEvents) -> ExitStatus {
        loop {
            let event = tokio::time::timeout(TIMEOUT, events.recv())
                .await
                .expect("timed out waiting for exit");
            match event {
                Some(PtyEvent::Exit(status)) => return status,
                Some(PtyEvent::Output(_)) => {}
                None => panic!("event stream ended without an exit"),
            }
        }
    }

    #[tokio::test]
    async fn test_release_stops_reader_held_open_by_background_job() {
        let spec = sh(Dimensions::default()).with_args(["-c", LINGERING_JOB]);
        let (pty, mut events) = PtySession::spawn(&spec).unwrap();

        assert_eq!(exit_of(&mut events).await, ExitStatus::with_code(0));

        pty.release();
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "reader still running after release");
    }

    #[tokio::test]
    async fn test_dropping_session_stops_reader() {
        let spec = sh(Dimensions::default()).with_args(["-c", LINGERING_JOB]);
        let (pty, mut events) = PtySession::spawn(&spec).unwrap();
        exit_of(&mut events).await;

        drop(pty);
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "reader still running after drop");
    }

    #[tokio::test]
    async fn test_forced_terminate_after_exit_is_noop() {
        let spec = sh(Dimensions::default()).with_args(["-c", "exit 4"]);
        let (pty, mut events) = PtySession::spawn(&spec).unwrap();

        let deadline = std::time::Instant::now() + TIMEOUT;
        while pty.is_alive() {
            assert!(std::time::Instant::now() < deadline, "process never exited");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The exit is known before it is reported; no signal may go out now
        pty.terminate(TerminationMode::Forced).unwrap();
        assert_eq!(exit_of(&mut events).await, ExitStatus::with_code(4));
    }

    #[tokio::test]
    async fn test_write_after_exit_fails() {
        let spec = sh(Dimensions::default()).with_args(["-c", "exit 0"]);
        let (pty, mut events) = PtySession::spawn(&spec).unwrap();
        drain_exits(&mut events).await;

        assert!(matches!(pty.write(b"ls\n"), Err(Error::SessionTerminated)));
        assert!(matches!(
            pty.resize(Dimensions::new(40, 120)),
            Err(Error::SessionTerminated)
        ));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let spec = PtySpawnSpec::new("/nonexistent/shell", Dimensions::default());
        let result = PtySession::spawn(&spec);
        assert!(matches!(result, Err(Error::Spawn(_))));
    }

    #[tokio::test]
    async fn test_spawn_zero_dimensions() {
        let result = PtySession::spawn(&sh(Dimensions::new(0, 80)));
        assert!(matches!(result, Err(Error::InvalidDimensions { .. })));
    }

    #[tokio::test]
    async fn test_resolved_shell_environment_reaches_process() {
        let shell = ShellResolver::new(Platform::Linux, std::env::vars())
            .with_shell_override(Some("/bin/sh".to_string()))
            .resolve();
        let spec = PtySpawnSpec::from_shell(&shell, Dimensions::default(), Some("/".into()));
        let (pty, mut events) = PtySession::spawn(&spec).unwrap();

        pty.write(b"echo \"term=$TERM cwd=$(pwd)\"\n").unwrap();
        let (output, _) = output_until(&mut events, "term=xterm-256color cwd=/").await;
        assert!(output.contains("term=xterm-256color cwd=/"));

        pty.terminate(TerminationMode::Forced).unwrap();
    }
}
