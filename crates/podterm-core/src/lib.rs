//! Core abstractions for pod terminal sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `ExecTarget` - Which process a session attaches to
//! - `TerminalSize` - Size events exchanged with the execution transport
//! - Error taxonomy shared by every layer of the bridge
//! - Execution transport contract traits

pub mod context;
pub mod error;
pub mod traits;

pub use context::{DEFAULT_COMMAND, ExecTarget, TerminalSize};
pub use error::{BridgeError, ExecutionError, ProtocolError, TransportError, UpgradeError};
pub use traits::{ExecStreams, Executor, InputSource, OutputSink, SessionId, TerminalSizeQueue};
