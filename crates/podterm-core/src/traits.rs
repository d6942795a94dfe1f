//! Execution transport contract.
//!
//! A remote-process streaming transport pulls input bytes, pushes output
//! bytes and polls for size changes, all concurrently for the lifetime of one
//! session. The bridge hands it one [`ExecStreams`] bundle implementing that
//! contract; the transport itself is injected through [`Executor`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{BridgeError, ExecTarget, ExecutionError, TerminalSize, TransportError};

/// Session identifier.
pub type SessionId = Uuid;

/// Byte-oriented input source (the remote process's stdin).
///
/// `&mut self` keeps at most one read in flight.
#[async_trait]
pub trait InputSource: Send {
    /// Wait for the next chunk of client input.
    ///
    /// An empty chunk is not end-of-stream: keep-alives and resizes produce
    /// one. End-of-stream is reported as [`TransportError::Closed`].
    async fn read_input(&mut self) -> Result<Bytes, BridgeError>;
}

/// Byte-oriented output sink (the remote process's stdout and stderr).
#[async_trait]
pub trait OutputSink: Send {
    /// Deliver one chunk to the client as exactly one frame.
    async fn write_output(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// Size-change poll source.
#[async_trait]
pub trait TerminalSizeQueue: Send {
    /// Wait for the next size change. `None` once the session has terminated.
    async fn next_size(&mut self) -> Option<TerminalSize>;
}

/// Everything an executor needs to run one interactive session.
pub struct ExecStreams {
    pub stdin: Box<dyn InputSource>,
    pub stdout: Box<dyn OutputSink>,
    /// Present only when `tty` is set.
    pub resize: Option<Box<dyn TerminalSizeQueue>>,
    pub tty: bool,
    /// Fired when the session terminates; the executor must stop promptly.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ExecStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStreams")
            .field("tty", &self.tty)
            .field("resize", &self.resize.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Trait for execution transports.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `target`'s command, streaming until it exits, the streams fail or
    /// `streams.cancel` fires.
    ///
    /// `Ok(())` means the remote side finished or was cancelled; an error is
    /// reported back to the client before the session is torn down.
    async fn stream(&self, target: &ExecTarget, streams: ExecStreams)
    -> Result<(), ExecutionError>;
}
