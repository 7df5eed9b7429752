use std::fmt;
use thiserror::Error;

use crate::stage::Stage;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why an object could not be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalKind {
    NotFound,
    Unavailable,
}

impl fmt::Display for RetrievalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("object not found"),
            Self::Unavailable => f.write_str("object store unavailable"),
        }
    }
}

/// Structured error types for the segmentation pipeline.
///
/// One variant per failure class, each carrying the context of the stage that
/// raised it (bucket/key, operation) and the underlying cause as `source`.
/// The error policy is applied once, by the handler, so stages only ever
/// return these through `?`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid event: {message}")]
    InvalidEvent { message: String },

    #[error("Retrieval error: {kind} (s3://{bucket}/{key})")]
    Retrieval {
        bucket: String,
        key: String,
        kind: RetrievalKind,
        #[source]
        source: BoxError,
    },

    #[error("Decode error: {operation} failed (key: {key})")]
    Decode {
        key: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Inference error: {operation} failed (endpoint: {endpoint})")]
    Inference {
        endpoint: String,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Persist error: {operation} failed for {target}")]
    Persist {
        target: String,
        operation: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    pub fn inference(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Inference {
            endpoint: endpoint.into(),
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn persist(
        target: impl Into<String>,
        operation: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Persist {
            target: target.into(),
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// The pipeline stage this error terminated.
    ///
    /// Configuration and event errors happen before any stage runs and are
    /// reported as `Idle`.
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Configuration { .. } | Self::InvalidEvent { .. } => Stage::Idle,
            Self::Retrieval { .. } => Stage::Fetching,
            Self::Decode { .. } => Stage::Decoding,
            Self::Inference { .. } => Stage::Invoking,
            Self::Persist { .. } => Stage::Persisting,
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Retrieval {
                kind: RetrievalKind::NotFound,
                ..
            }
        )
    }
}

/// Local scratch I/O is the only place plain I/O errors come from, so a bare
/// `io::Error` is a persist failure with no more specific target.
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Persist {
            target: "scratch".to_string(),
            operation: "scratch file i/o".to_string(),
            source: Box::new(err),
        }
    }
}
