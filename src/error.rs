//! Error types callers need to tell apart.
//!
//! Most of the application propagates `anyhow::Error`; these enums exist
//! for the failures that change control flow (a missing dataset aborts the
//! request, a bad plan falls back to the default plan, a sandbox failure
//! becomes an error-status step result).

use std::path::PathBuf;

/// Failure while loading or cleaning the dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The source file does not exist.
    #[error("data file not found at: {0}")]
    NotFound(PathBuf),

    /// The file exists but could not be parsed as a table.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Nothing left after cleaning.
    #[error("dataset {0} has no usable rows")]
    Empty(PathBuf),

    #[error("I/O error reading dataset: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while turning a user request into analysis steps.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The completion call itself failed.
    #[error("planning model call failed: {0}")]
    Model(String),

    /// The model answered with something that is not a step list.
    #[error("could not parse plan: {0}")]
    Parse(String),

    /// The model answered with an empty list.
    #[error("plan contained no steps")]
    Empty,
}

/// Failure while running generated code.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The interpreter could not be started.
    #[error("failed to start interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution timed out after {0}s")]
    Timeout(u64),

    /// The generated program raised or exited non-zero.
    #[error("{0}")]
    Failed(String),

    /// The interpreter finished but its result file was unreadable.
    #[error("could not read execution result: {0}")]
    Output(String),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}
