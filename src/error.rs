//! Crate-level error handling.
//!
//! [`PipelineError`] covers everything that happens inside the dataflow core.
//! `MedflowError` wraps it together with the errors of the surrounding
//! surfaces (configuration files, snapshots) and supports adding context.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for medflow operations
#[derive(Error, Debug)]
pub enum MedflowError {
    /// Errors raised by nodes, channels and data objects
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<MedflowError>,
    },
}

impl MedflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        MedflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The pipeline error at the root of this error, if any.
    pub fn pipeline_error(&self) -> Option<&PipelineError> {
        match self {
            MedflowError::Pipeline(e) => Some(e),
            MedflowError::WithContext { source, .. } => source.pipeline_error(),
            _ => None,
        }
    }

    /// True when the root cause is pipeline cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.pipeline_error()
            .map(PipelineError::is_cancelled)
            .unwrap_or(false)
    }
}

impl From<serde_json::Error> for MedflowError {
    fn from(err: serde_json::Error) -> Self {
        MedflowError::Serialization(err.to_string())
    }
}

/// Result type alias for medflow operations
pub type Result<T> = std::result::Result<T, MedflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| MedflowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| MedflowError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wraps_message() {
        let err: Result<()> = Err(MedflowError::Config("bad".into()));
        let err = err.context("loading engine.toml").unwrap_err();
        assert_eq!(err.to_string(), "loading engine.toml: Configuration error: bad");
    }

    #[test]
    fn test_cancellation_survives_context() {
        let err: std::result::Result<(), PipelineError> = Err(PipelineError::cancelled("stop"));
        let err = err.with_context(|| "running demo".to_string()).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.pipeline_error(), Some(&PipelineError::cancelled("stop")));
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err = MedflowError::from(PipelineError::CycleDetected);
        assert_eq!(err.to_string(), "Cycle detected in pipeline graph");
        assert!(!err.is_cancelled());
    }
}
