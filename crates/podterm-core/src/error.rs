//! Error taxonomy for the terminal bridge.

use std::time::Duration;

use thiserror::Error;

/// A client envelope could not be understood.
///
/// Local to one frame: the session survives it unless configured otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("unknown message type '{0}'")]
    UnknownOperation(String),
    #[error("operation '{0}' is not accepted from clients")]
    UnexpectedOperation(String),
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// The client connection failed or went away. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("close timed out after {0:?}")]
    CloseTimeout(Duration),
}

/// The remote process or its streaming transport reported a failure.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The HTTP connection could not be promoted to a session channel.
///
/// No session exists when this is returned.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("not a websocket request: {0}")]
    NotWebSocket(String),
    #[error("origin not allowed: {0}")]
    OriginRejected(String),
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("handshake failed: {0}")]
    Failed(String),
}

/// Any failure surfaced through the bridge's read path.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("upgrade error: {0}")]
    Upgrade(#[from] UpgradeError),
}

impl BridgeError {
    /// Whether this error ends the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }

    /// Whether the client connection is gone.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for UpgradeError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            Self::MissingParam(_) | Self::InvalidQuery(_) | Self::NotWebSocket(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::OriginRejected(_) => StatusCode::FORBIDDEN,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
