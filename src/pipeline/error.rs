//! Pipeline-specific error types.
//!
//! Cancellation (`Cancelled`) is control flow, not a failure: a channel that has
//! been stopped wakes every blocked caller with it. Use
//! [`PipelineError::is_cancelled`] to tell it apart from real errors.

use crate::device::DeviceId;
use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Bad wiring, wrong port count, invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{node} has no {direction} port {port}")]
    NoSuchPort {
        node: String,
        direction: &'static str,
        port: u32,
    },

    #[error("Input port {port} on {node} is missing its required connection")]
    MissingInput { node: String, port: u32 },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Retain/release protocol violated, or a representation is not resident.
    #[error("Resource state error: {0}")]
    ResourceState(String),

    #[error("Access conflict on {device}: {message}")]
    AccessConflict { device: DeviceId, message: String },

    /// Non-blocking peek found nothing produced yet.
    #[error("No frame available")]
    NoFrame,

    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Node {node_id:?} ({node}) failed: {message}")]
    Execution {
        node_id: NodeId,
        node: String,
        message: String,
    },

    #[error("Device error: {0}")]
    Device(String),
}

impl PipelineError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        PipelineError::Cancelled {
            reason: reason.into(),
        }
    }

    /// True when this error is the cancellation signal of a stopped channel.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(PipelineError::cancelled("stop").is_cancelled());
        assert!(!PipelineError::NoFrame.is_cancelled());
        assert!(!PipelineError::ResourceState("x".into()).is_cancelled());
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::TypeMismatch {
            expected: "Buffer",
            actual: "Value",
        };
        assert_eq!(err.to_string(), "Type mismatch: expected Buffer, got Value");

        let err = PipelineError::MissingInput {
            node: "Transform".into(),
            port: 1,
        };
        assert!(err.to_string().contains("port 1"));
    }
}
