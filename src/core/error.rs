//! Node-level error taxonomy, aligned with the wire `ErrorCode` set.

use crate::core::protocol::{ErrorCode, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A typed ERROR_MESSAGE received from the remote side.
    #[error("remote error: {message}")]
    Remote { code: ErrorCode, message: String },
}

impl NodeError {
    /// The wire code this error maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::FileNotFound(_) => ErrorCode::FileNotFound,
            NodeError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            NodeError::Network(_) => ErrorCode::NetworkError,
            NodeError::Protocol(_) => ErrorCode::ProtocolError,
            NodeError::Remote { code, .. } => *code,
        }
    }

    /// Classify a filesystem error for the wire.
    pub fn from_io(filename: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                NodeError::PermissionDenied(filename.to_string())
            }
            _ => NodeError::FileNotFound(filename.to_string()),
        }
    }
}
