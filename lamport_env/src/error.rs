//! Error types for the Lamport environment abstraction.

use crate::types::NodeId;
use thiserror::Error;

/// Errors that can occur while running nodes and the relay.
///
/// Only [`EnvError::ConnectFailure`] and [`EnvError::HandshakeRejected`] are
/// fatal, and only at node startup. Everything else is a per-message
/// condition that the enclosing loop logs or ignores.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A wire line did not decode
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The relay has no live connection for the recipient
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(NodeId),

    /// The peer closed or reset the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// Could not reach the relay at startup
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// The relay refused the requested identity
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Configuration values out of range
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvError {
    /// Creates a malformed-message error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Creates a connect failure.
    pub fn connect(addr: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        Self::ConnectFailure(format!("{addr}: {cause}"))
    }

    /// Creates a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns true if the error means the connection is gone for good.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => is_closed_kind(e.kind()),
            _ => false,
        }
    }
}

/// I/O error kinds that signal a closed or reset stream.
pub(crate) fn is_closed_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_classification() {
        assert!(EnvError::ConnectionClosed.is_closed());
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(EnvError::from(reset).is_closed());
        let other = std::io::Error::from(std::io::ErrorKind::InvalidData);
        assert!(!EnvError::from(other).is_closed());
        assert!(!EnvError::malformed("x").is_closed());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            EnvError::UnknownRecipient(NodeId(2)).to_string(),
            "Unknown recipient: 2"
        );
    }
}
