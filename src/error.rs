//! Error types for the audio share client

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown command ordinal: {0}")]
    UnknownCommand(i32),

    #[error("Invalid payload length: {0}")]
    InvalidLength(i32),

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),
}

/// Control and data channel errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connect to {0} timed out after {1:?}")]
    ConnectTimeout(String, Duration),

    #[error("Unresolved address: {0}")]
    Unresolved(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid stream id: {0}")]
    InvalidStreamId(i32),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("No heartbeat for {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Handshake timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Orchestrator misuse
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A session is already active")]
    AlreadyActive,

    #[error("No tokio runtime available to spawn the session")]
    NoRuntime,
}

/// Errors raised by an audio sink implementation
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Sink rejected the stream: {0}")]
    Rejected(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Coarse failure classes reported to callers deciding on a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    ConnectTimeout,
    MalformedFrame,
    ProtocolViolation,
    NetworkFailure,
    HeartbeatTimeout,
    Sink,
    Config,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Codec(_) => FailureKind::MalformedFrame,
            Error::Network(e) => match e {
                NetworkError::ConnectTimeout(..) => FailureKind::ConnectTimeout,
                NetworkError::ProtocolViolation(_) | NetworkError::InvalidStreamId(_) => {
                    FailureKind::ProtocolViolation
                }
                NetworkError::HeartbeatTimeout(_) => FailureKind::HeartbeatTimeout,
                NetworkError::Unresolved(_)
                | NetworkError::ConnectionClosed
                | NetworkError::HandshakeTimeout(_)
                | NetworkError::BindFailed(_)
                | NetworkError::Io(_) => FailureKind::NetworkFailure,
            },
            Error::Io(_) => FailureKind::NetworkFailure,
            Error::Sink(_) => FailureKind::Sink,
            Error::Session(_) | Error::Config(_) => FailureKind::Config,
        }
    }

    /// Whether a caller-driven restart can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::ConnectTimeout | FailureKind::NetworkFailure | FailureKind::HeartbeatTimeout
        )
    }
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let err: Error = CodecError::UnknownCommand(9).into();
        assert_eq!(err.kind(), FailureKind::MalformedFrame);
        assert!(!err.is_retryable());

        let err: Error = NetworkError::InvalidStreamId(0).into();
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);

        let err: Error = NetworkError::ConnectionClosed.into();
        assert_eq!(err.kind(), FailureKind::NetworkFailure);
        assert!(err.is_retryable());

        let err: Error = NetworkError::HeartbeatTimeout(Duration::from_secs(5)).into();
        assert_eq!(err.kind(), FailureKind::HeartbeatTimeout);
        assert!(err.is_retryable());
    }
}
