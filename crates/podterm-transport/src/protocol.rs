//! Wire protocol for terminal control envelopes.
//!
//! Every frame in either direction is one JSON object:
//!
//! ```json
//! { "operation": "input", "data": "ls\n", "rows": 0, "cols": 0 }
//! ```
//!
//! Decoding is strict. An unknown `operation` is an error rather than a
//! dropped frame, since silently discarding bytes desynchronizes an
//! interactive shell.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use podterm_core::{ProtocolError, TerminalSize};
use serde::{Deserialize, Serialize};

/// Envelope operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Client keystrokes for the remote stdin.
    Input,
    /// New terminal dimensions.
    Resize,
    /// Keep-alive.
    Ping,
    /// Remote stdout/stderr (server to client only).
    Output,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Resize => "resize",
            Self::Ping => "ping",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // `stdin`/`stdout` are what older web consoles send.
            "input" | "stdin" => Ok(Self::Input),
            "resize" => Ok(Self::Resize),
            "ping" => Ok(Self::Ping),
            "output" | "stdout" => Ok(Self::Output),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// One control envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlEnvelope {
    pub operation: Operation,
    pub data: String,
    pub rows: u16,
    pub cols: u16,
}

/// Envelope as read off the wire, before the operation is validated.
#[derive(Deserialize)]
struct RawEnvelope {
    operation: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    rows: u16,
    #[serde(default)]
    cols: u16,
}

impl ControlEnvelope {
    /// Create an input envelope.
    #[must_use]
    pub fn input(data: impl Into<String>) -> Self {
        Self::with_data(Operation::Input, data.into())
    }

    /// Create an output envelope from raw bytes.
    ///
    /// Bytes that are not valid UTF-8 are replaced with U+FFFD.
    #[must_use]
    pub fn output(data: &[u8]) -> Self {
        Self::with_data(Operation::Output, String::from_utf8_lossy(data).into_owned())
    }

    /// Create a resize envelope.
    #[must_use]
    pub const fn resize(size: TerminalSize) -> Self {
        Self {
            operation: Operation::Resize,
            data: String::new(),
            rows: size.rows,
            cols: size.cols,
        }
    }

    /// Create a keep-alive envelope.
    #[must_use]
    pub const fn ping() -> Self {
        Self {
            operation: Operation::Ping,
            data: String::new(),
            rows: 0,
            cols: 0,
        }
    }

    const fn with_data(operation: Operation, data: String) -> Self {
        Self {
            operation,
            data,
            rows: 0,
            cols: 0,
        }
    }

    /// Serialize to one JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Input(Bytes),
    Resize(TerminalSize),
    Ping,
}

/// Decode one client text frame.
///
/// # Errors
/// Returns [`ProtocolError::Malformed`] for invalid JSON,
/// [`ProtocolError::UnknownOperation`] for an unrecognized operation and
/// [`ProtocolError::UnexpectedOperation`] for `output`.
pub fn decode(text: &str) -> Result<ClientCommand, ProtocolError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match raw.operation.parse::<Operation>()? {
        Operation::Input => Ok(ClientCommand::Input(Bytes::from(raw.data))),
        Operation::Resize => Ok(ClientCommand::Resize(TerminalSize::new(raw.rows, raw.cols))),
        Operation::Ping => Ok(ClientCommand::Ping),
        Operation::Output => Err(ProtocolError::UnexpectedOperation(raw.operation)),
    }
}

/// Decode one client binary frame carrying a UTF-8 JSON envelope.
///
/// # Errors
/// Returns [`ProtocolError::InvalidUtf8`] or any error from [`decode`].
pub fn decode_binary(data: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode(text)
}

/// Encode one chunk of remote output as exactly one frame.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_output(data: &[u8]) -> Result<String, ProtocolError> {
    ControlEnvelope::output(data).to_json()
}
