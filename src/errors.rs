//! Typed error hierarchy for taskforge.
//!
//! Three top-level enums cover the three failure domains:
//! - `QueueError`: durable queue store failures (NotFound, fatal I/O)
//! - `CapabilityError`: code generation and version-control boundary failures
//! - `TaskError`: failures that abort a single task run

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the durable queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Queue I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Queue document at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to lock queue at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Queue task panicked: {0}")]
    Join(String),
}

impl QueueError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by an external capability (code generation or version control).
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Capability returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed capability response: {0}")]
    Malformed(String),

    #[error("Capability timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),
}

/// Errors that abort a task run.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Step {step} has unmet dependencies: {}", missing.join(", "))]
    UnmetDependency { step: String, missing: Vec<String> },

    #[error("Failed to write workspace file {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid step: {0}")]
    InvalidStep(String),
}
