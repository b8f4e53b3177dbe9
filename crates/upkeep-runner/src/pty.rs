//! Pseudo-terminal sessions.
//!
//! A [`PtySession`] owns exactly one PTY master and the child process
//! spawned onto its slave side, for the lifetime of one phase invocation.
//! A dedicated OS thread pumps master reads into an async channel; writes
//! and waits go through blocking tasks so the async runtime is never
//! stalled on terminal I/O.
//!
//! `close()` is idempotent and runs the full termination ladder (SIGTERM,
//! grace period, SIGKILL, reap). Dropping an unclosed session delivers a
//! best-effort kill so no child outlives its job.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Grace period between SIGTERM and SIGKILL on close.
pub const TERM_GRACE: Duration = Duration::from_secs(5);

/// Interval at which `wait` polls for child exit.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Options for opening a session.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Extra environment variables layered over the inherited set.
    pub env: HashMap<String, String>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// PTY width in columns.
    pub cols: u16,
    /// PTY height in rows.
    pub rows: u16,
}

impl SessionOptions {
    /// Create options with the given dimensions.
    pub fn with_size(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            ..Self::default()
        }
    }
}

/// One pseudo-terminal and its child process.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<StdMutex<Box<dyn Write + Send>>>,
    child: Box<dyn Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    output: mpsc::Receiver<Vec<u8>>,
    pid: Option<u32>,
    cols: u16,
    rows: u16,
    exit_code: Option<i32>,
    closed: bool,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("pid", &self.pid)
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("exit_code", &self.exit_code)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PtySession {
    /// Allocate a PTY and spawn `command` on its slave side.
    ///
    /// The child inherits this process's environment plus the overrides
    /// in `options.env`, and becomes the session leader of the new
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::SpawnFailed`] if the PTY cannot be
    /// allocated or the command cannot be spawned.
    pub fn open(command: &[String], options: &SessionOptions) -> Result<Self> {
        let program = command.first().ok_or_else(|| RunnerError::SpawnFailed {
            reason: "empty command".into(),
        })?;

        let cols = options.cols.max(1);
        let rows = options.rows.max(1);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RunnerError::SpawnFailed {
                reason: format!("openpty: {e}"),
            })?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&command[1..]);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = options.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RunnerError::SpawnFailed {
                reason: format!("spawn {program}: {e}"),
            })?;
        // Close the parent's slave handle so reads see EOF when the
        // child exits.
        drop(pair.slave);

        let killer = child.clone_killer();
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RunnerError::SpawnFailed {
                reason: format!("clone reader: {e}"),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RunnerError::SpawnFailed {
                reason: format!("take writer: {e}"),
            })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        std::thread::spawn(move || pump_reads(reader, tx));

        debug!(pid, cols, rows, "pty session opened");

        Ok(Self {
            master: pair.master,
            writer: Arc::new(StdMutex::new(writer)),
            child,
            killer,
            output: rx,
            pid,
            cols,
            rows,
            exit_code: None,
            closed: false,
        })
    }

    /// Child process id, when known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current terminal width.
    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Current terminal height.
    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Cached exit code from the last successful reap, if any.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the child is still running.
    pub fn is_running(&mut self) -> bool {
        if self.exit_code.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_code = Some(status.exit_code() as i32);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Read the next chunk of output, failing after `timeout`.
    ///
    /// # Errors
    ///
    /// [`RunnerError::ReadTimedOut`] when the deadline elapses with no
    /// data; [`RunnerError::Eof`] once the child has closed the PTY and
    /// all buffered output is drained.
    pub async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        match tokio::time::timeout(timeout, self.output.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(RunnerError::Eof),
            Err(_) => Err(RunnerError::ReadTimedOut),
        }
    }

    /// Write bytes to the child's terminal. Partial writes are retried
    /// until the whole buffer is delivered.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(RunnerError::SessionClosed);
        }
        let writer = Arc::clone(&self.writer);
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|_| io::Error::other("pty writer poisoned"))?;
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(|e| RunnerError::Join(e.to_string()))??;
        Ok(())
    }

    /// Resize the terminal. The kernel delivers SIGWINCH to the child's
    /// foreground process group as part of the window-size change.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let cols = cols.max(1);
        let rows = rows.max(1);
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RunnerError::Io(io::Error::other(e.to_string())))?;
        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    /// Deliver a signal to the child's process group.
    ///
    /// Delivery to an already-exited process is not an error.
    pub fn send_signal(&self, signal: Signal) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(RunnerError::Signal(e.to_string())),
        }
    }

    /// Wait for the child to exit, polling until `timeout` (forever when
    /// `None`), and return its exit code.
    ///
    /// # Errors
    ///
    /// [`RunnerError::WaitTimedOut`] when the deadline elapses first.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<i32> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(code) = self.exit_code {
                return Ok(code);
            }
            if !self.is_running() {
                if let Some(code) = self.exit_code {
                    return Ok(code);
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(RunnerError::WaitTimedOut);
                }
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Terminate the child and release the PTY.
    ///
    /// Sends SIGTERM, waits up to [`TERM_GRACE`], then SIGKILL, then
    /// reaps. Calling `close` more than once is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.is_running() {
            let _ = self.send_signal(Signal::SIGTERM);
            let deadline = Instant::now() + TERM_GRACE;
            while self.is_running() && Instant::now() < deadline {
                tokio::time::sleep(WAIT_POLL).await;
            }
            if self.is_running() {
                debug!(pid = self.pid, "grace expired, killing child");
                let _ = self.killer.kill();
                let _ = self.wait(Some(Duration::from_secs(1))).await;
            }
        }
        Ok(())
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if !self.closed && self.exit_code.is_none() {
            // Last-resort cleanup when close() was skipped.
            let _ = self.killer.kill();
        }
    }
}

/// Pump master reads into the output channel until EOF or the receiver
/// goes away.
fn pump_reads(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}
