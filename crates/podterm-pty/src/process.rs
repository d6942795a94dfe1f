//! A child process attached to a local pseudo-terminal.

use std::{
    io::{Read, Write},
    path::PathBuf,
    sync::Mutex,
};

use bytes::Bytes;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// `EIO`, which Linux reports on the master once the child side closes.
const EIO: i32 = 5;

/// Chunks buffered between the blocking pumps and async callers.
const CHANNEL_CAPACITY: usize = 64;

/// PTY error.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    Open(String),
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("failed to resize PTY: {0}")]
    Resize(String),
    #[error("failed to kill process: {0}")]
    Kill(String),
    #[error("PTY input closed")]
    InputClosed,
}

/// What to run and how big the terminal starts.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

impl SpawnSpec {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            rows: 24,
            cols: 80,
        }
    }

    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Exit status of the PTY child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
    pub success: bool,
}

/// A running process with its PTY.
///
/// Reads and writes on the PTY are blocking, so each direction is pumped by
/// its own blocking task and exposed through channels. Every method takes
/// `&self`, so input, resize and exit can be driven concurrently.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    input: mpsc::Sender<Bytes>,
    exit: watch::Receiver<Option<Result<ExitStatus, String>>>,
    pid: Option<u32>,
}

/// Output side of a [`PtyProcess`].
#[derive(Debug)]
pub struct PtyOutput {
    rx: mpsc::Receiver<std::io::Result<Bytes>>,
}

impl PtyOutput {
    /// Next chunk of terminal output, or `None` at EOF.
    ///
    /// Cancel-safe.
    pub async fn read(&mut self) -> Option<std::io::Result<Bytes>> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Open a PTY and spawn `spec` on it.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the PTY cannot be opened or the process fails to start.
    pub fn spawn(spec: &SpawnSpec) -> Result<(Self, PtyOutput), PtyError> {
        let pair = native_pty_system()
            .openpty(pty_size(spec.rows, spec.cols))
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        // The child holds its own copy of the slave.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        tracing::debug!(?pid, program = %spec.program.display(), "spawned PTY process");

        let process = Self {
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            input: spawn_writer(writer),
            exit: spawn_waiter(child),
            pid,
        };
        Ok((process, PtyOutput { rx: spawn_reader(reader) }))
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue bytes for the process's stdin.
    ///
    /// # Errors
    /// Returns [`PtyError::InputClosed`] once the PTY no longer accepts input.
    pub async fn write(&self, data: Bytes) -> Result<(), PtyError> {
        self.input.send(data).await.map_err(|_| PtyError::InputClosed)
    }

    /// Resize the terminal.
    ///
    /// # Errors
    /// Returns error if the PTY rejects the new size.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let master = self
            .master
            .lock()
            .map_err(|_| PtyError::Resize("master lock poisoned".to_string()))?;
        master
            .resize(pty_size(rows, cols))
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    /// Wait for the process to exit. Cancel-safe and repeatable.
    ///
    /// # Errors
    /// Returns error if waiting on the child fails.
    pub async fn wait(&self) -> std::io::Result<ExitStatus> {
        let mut exit = self.exit.clone();
        let status = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| std::io::Error::other("exit waiter dropped"))?;
        match status.as_ref() {
            Some(Ok(status)) => Ok(*status),
            Some(Err(e)) => Err(std::io::Error::other(e.clone())),
            None => Err(std::io::Error::other("exit status missing")),
        }
    }

    /// Whether the process has been reaped.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Kill the process.
    ///
    /// # Errors
    /// Returns error if the signal cannot be delivered.
    pub fn kill(&self) -> Result<(), PtyError> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| PtyError::Kill("killer lock poisoned".to_string()))?;
        killer.kill().map_err(|e| PtyError::Kill(e.to_string()))
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        // The blocking reader only returns once the child is gone.
        if !self.has_exited() {
            let _ = self.kill();
        }
    }
}

const fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_reader(mut reader: Box<dyn Read + Send>) -> mpsc::Receiver<std::io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let chunk = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&buffer[..n])),
                Err(e) if e.raw_os_error() == Some(EIO) => break,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() || failed {
                break;
            }
        }
        tracing::trace!("PTY reader finished");
    });
    rx
}

fn spawn_writer(mut writer: Box<dyn Write + Send>) -> mpsc::Sender<Bytes> {
    let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                tracing::debug!(error = %e, "PTY write failed");
                break;
            }
        }
    });
    tx
}

fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
) -> watch::Receiver<Option<Result<ExitStatus, String>>> {
    let (tx, rx) = watch::channel(None);
    tokio::task::spawn_blocking(move || {
        let status = child
            .wait()
            .map(|s| ExitStatus {
                code: s.exit_code(),
                success: s.success(),
            })
            .map_err(|e| e.to_string());
        tx.send_replace(Some(status));
    });
    rx
}
