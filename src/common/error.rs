//! Error types for raftkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Key not found")]
    KeyNotFound,

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // === Protocol Errors ===
    #[error("protocol error; {0}")]
    Protocol(String),

    // === Raft Errors ===
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    #[error("No leader elected")]
    NoLeader,

    #[error("Raft error: {0}")]
    Raft(#[from] raft::Error),

    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Consensus timeout after {0:?}")]
    ConsensusTimeout(std::time::Duration),

    // === Network Errors ===
    #[error("Forwarding to leader {leader} failed: {reason}")]
    Forwarding { leader: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    Remote(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_)
                | Error::ConsensusTimeout(_)
                | Error::NotLeader(_)
                | Error::NoLeader
                | Error::Forwarding { .. }
        )
    }

    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<protobuf::ProtobufError> for Error {
    fn from(e: protobuf::ProtobufError) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<crate::protocol::FrameError> for Error {
    fn from(e: crate::protocol::FrameError) -> Self {
        match e {
            crate::protocol::FrameError::Incomplete => Error::Protocol("incomplete frame".into()),
            crate::protocol::FrameError::Invalid(reason) => Error::Protocol(reason),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConsensusTimeout(Duration::from_secs(5)).is_retryable());
        assert!(Error::NoLeader.is_retryable());
        assert!(!Error::KeyNotFound.is_retryable());
        assert!(!Error::Protocol("bad".into()).is_retryable());
    }

    #[test]
    fn test_checksum_display() {
        let err = Error::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected deadbeef, got 00000001"
        );
    }
}
