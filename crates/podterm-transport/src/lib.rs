//! Transport layer for web terminals.
//!
//! Provides:
//! - Control envelope codec (JSON `operation`/`data`/`rows`/`cols`)
//! - Session transport over any frame stream and text sink
//! - Bridge driver tying a connection to an executor
//! - WebSocket surface (feature: websocket)

pub mod bridge;
pub mod protocol;
pub mod terminal;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use bridge::{EXEC_ERROR_PREFIX, run_bridge};
pub use protocol::{ClientCommand, ControlEnvelope, Operation};
pub use terminal::{Frame, SessionReader, SessionTransport, SessionWriter};
#[cfg(feature = "websocket")]
pub use websocket::{ExecQuery, WsConfig, WsState, create_ws_router};
