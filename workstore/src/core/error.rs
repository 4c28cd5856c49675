use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for workstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Store is not initialized")]
    Uninitialized,

    #[error("Store has been destroyed")]
    Terminated,

    #[error("Worker fault: {0}")]
    WorkerFault(String),

    #[error("Oversized response: {0}")]
    OversizedResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Get the wire kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::Decode,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Backend(_) | Self::Io(_) | Self::Config(_) => ErrorKind::Backend,
            Self::Uninitialized => ErrorKind::Uninitialized,
            Self::Terminated => ErrorKind::Terminated,
            Self::WorkerFault(_) => ErrorKind::WorkerFault,
            Self::OversizedResponse(_) => ErrorKind::OversizedResponse,
        }
    }

    /// Convert into the form carried across the worker boundary
    pub fn to_wire(&self) -> WireError {
        let message = match self {
            Self::Decode(m)
            | Self::Serialization(m)
            | Self::Backend(m)
            | Self::WorkerFault(m)
            | Self::OversizedResponse(m)
            | Self::Config(m) => m.clone(),
            other => other.to_string(),
        };

        WireError {
            kind: self.kind(),
            message,
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Error kinds that survive a trip through the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    Serialization,
    Backend,
    Uninitialized,
    Terminated,
    WorkerFault,
    OversizedResponse,
}

/// Error object as encoded by the worker: enough to re-raise on the caller side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<WireError> for StoreError {
    fn from(e: WireError) -> Self {
        match e.kind {
            ErrorKind::Decode => StoreError::Decode(e.message),
            ErrorKind::Serialization => StoreError::Serialization(e.message),
            ErrorKind::Backend => StoreError::Backend(e.message),
            ErrorKind::Uninitialized => StoreError::Uninitialized,
            ErrorKind::Terminated => StoreError::Terminated,
            ErrorKind::WorkerFault => StoreError::WorkerFault(e.message),
            ErrorKind::OversizedResponse => StoreError::OversizedResponse(e.message),
        }
    }
}

/// Result type alias for workstore operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_preserves_kind_and_message() {
        let err = StoreError::Backend("disk on fire".to_string());
        let wire = err.to_wire();
        assert_eq!(wire.kind, ErrorKind::Backend);
        assert_eq!(wire.message, "disk on fire");

        match StoreError::from(wire) {
            StoreError::Backend(msg) => assert_eq!(msg, "disk on fire"),
            other => panic!("Expected backend error, got {:?}", other),
        }
    }

    #[test]
    fn test_unit_variants_survive_wire() {
        let wire = StoreError::Uninitialized.to_wire();
        assert!(matches!(
            StoreError::from(wire),
            StoreError::Uninitialized
        ));
    }
}
