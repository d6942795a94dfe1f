//! Local pseudo-terminal processes.
//!
//! Provides:
//! - `PtyProcess` - a child process attached to a PTY, with async I/O
//! - Shell detection and executable resolution

pub mod process;
pub mod shell;

pub use process::{ExitStatus, PtyError, PtyOutput, PtyProcess, SpawnSpec};
pub use shell::{UnixShell, get_interactive_shell, merge_paths, resolve_executable_path};
