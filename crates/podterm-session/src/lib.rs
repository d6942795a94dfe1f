//! Session lifecycle and orchestration for pod terminals.
//!
//! Provides:
//! - `Lifecycle` - Single-fire termination signal and teardown ordering
//! - `resize_channel` - Resize hand-off between the read path and the size poller
//! - `SessionManager` - Registry of live sessions with the injected executor

pub mod config;
pub mod lifecycle;
pub mod manager;
pub mod resize;

pub use config::SessionConfig;
pub use lifecycle::{Lifecycle, LifecycleState, TerminationReason};
pub use manager::{ManagerError, SessionHandle, SessionInfo, SessionManager};
pub use resize::{ResizeError, ResizePolicy, ResizeQueue, ResizeSender, resize_channel};
