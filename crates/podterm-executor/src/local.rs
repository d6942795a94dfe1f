//! Executor running the session's command in a local PTY.
//!
//! Stands in for a cluster exec transport during development: the target's
//! namespace, pod and container only label the session.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use podterm_core::{
    ExecStreams, ExecTarget, ExecutionError, Executor, InputSource, TerminalSize,
    TerminalSizeQueue,
};
use podterm_pty::{PtyProcess, SpawnSpec};

use crate::command::CommandBuilder;

/// How long to wait for the exit status once output has ended.
const EXIT_WAIT: Duration = Duration::from_secs(1);

/// Runs `target.command` on this host.
#[derive(Debug, Clone, Default)]
pub struct LocalPtyExecutor {
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl LocalPtyExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every process in `dir`.
    #[must_use]
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an extra environment variable for every process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    async fn spawn_spec(&self, target: &ExecTarget) -> Result<SpawnSpec, ExecutionError> {
        let (program, args) = CommandBuilder::for_target(target).resolve().await?;
        let size = TerminalSize::default();
        let mut spec = SpawnSpec::new(program).args(args).size(size.rows, size.cols);
        spec.cwd.clone_from(&self.cwd);
        spec.env.extend(self.env.iter().cloned());
        Ok(spec)
    }
}

#[async_trait]
impl Executor for LocalPtyExecutor {
    async fn stream(
        &self,
        target: &ExecTarget,
        streams: ExecStreams,
    ) -> Result<(), ExecutionError> {
        let ExecStreams {
            mut stdin,
            mut stdout,
            resize,
            cancel,
            ..
        } = streams;

        let spec = self.spawn_spec(target).await?;
        let (process, mut output) =
            PtyProcess::spawn(&spec).map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;
        tracing::debug!(pid = ?process.pid(), program = %spec.program.display(), "local exec started");

        let pump_output = async {
            let mut carry = Utf8Carry::default();
            while let Some(chunk) = output.read().await {
                let complete = carry.push(&chunk?);
                if !complete.is_empty() {
                    stdout.write_output(&complete).await?;
                }
            }
            let rest = carry.finish();
            if !rest.is_empty() {
                stdout.write_output(&rest).await?;
            }
            Ok::<_, ExecutionError>(())
        };
        let pump_rest = async {
            tokio::join!(
                pump_input(stdin.as_mut(), &process),
                pump_resize(resize, &process)
            );
            // The session ends on cancel or output EOF, never here.
            std::future::pending::<()>().await;
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = process.kill() {
                    tracing::debug!(error = %e, "kill after cancel failed");
                }
                Ok(())
            }
            result = pump_output => result,
            () = pump_rest => Ok(()),
        };

        match tokio::time::timeout(EXIT_WAIT, process.wait()).await {
            Ok(Ok(status)) => tracing::info!(code = status.code, success = status.success, "process exited"),
            Ok(Err(e)) => tracing::debug!(error = %e, "exit status unavailable"),
            Err(_) => tracing::debug!("process still running after stream ended"),
        }
        result
    }
}

/// Forward client input until the client goes away or the PTY stops reading.
async fn pump_input(stdin: &mut dyn InputSource, process: &PtyProcess) {
    loop {
        match stdin.read_input().await {
            Ok(chunk) if chunk.is_empty() => {}
            Ok(chunk) => {
                if process.write(chunk).await.is_err() {
                    return;
                }
            }
            Err(e) if e.is_fatal() => return,
            Err(e) => tracing::debug!(error = %e, "skipping bad input frame"),
        }
    }
}

async fn pump_resize(queue: Option<Box<dyn TerminalSizeQueue>>, process: &PtyProcess) {
    let Some(mut queue) = queue else {
        return;
    };
    while let Some(size) = queue.next_size().await {
        tracing::debug!(%size, "resize PTY");
        if let Err(e) = process.resize(size.rows, size.cols) {
            tracing::warn!(error = %e, "resize failed");
        }
    }
}

/// Holds back a UTF-8 sequence split across PTY reads so every output frame
/// carries whole characters.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Append `chunk` and take everything up to an unfinished trailing
    /// sequence. Invalid bytes are passed through.
    fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        let keep = incomplete_suffix(&self.pending);
        let tail = self.pending.split_off(self.pending.len() - keep);
        std::mem::replace(&mut self.pending, tail)
    }

    /// Whatever is left once output has ended.
    fn finish(self) -> Vec<u8> {
        self.pending
    }
}

/// Length of a truncated sequence at the end of `buf`.
fn incomplete_suffix(buf: &[u8]) -> usize {
    let mut rest = buf;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(bad) => rest = &rest[e.valid_up_to() + bad..],
            },
        }
    }
}
