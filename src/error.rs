//! Error types for the bridge's data plane.

use thiserror::Error;

/// Every fallible operation in the bridge returns one of these kinds.
///
/// None of these ever unwind out of a running loop: the polling engine and
/// connection supervisor catch them at the loop boundary, log, and continue.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("endpoint down: {0}")]
    EndpointDown(String),

    #[error("transient I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("type coercion failed: {0}")]
    TypeCoercion(String),

    #[error("malformed command: {0}")]
    CommandMalformed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl BridgeError {
    /// Transient/endpoint-down errors are swallowed at the worker level and
    /// reflected only in the liveness map, never surfaced synchronously.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::TransientIo(_) | BridgeError::EndpointDown(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
