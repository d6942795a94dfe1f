//! Execution transports for pod terminal sessions.
//!
//! Provides:
//! - `LocalPtyExecutor` - runs the session's command in a local PTY
//! - Command building utilities

pub mod command;
pub mod local;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use local::LocalPtyExecutor;
