//! Execution of generated analysis code.
//!
//! The quantitative agent hands source text to a [`CodeExecutor`] and gets
//! back the values of the designated result variables. Implementations must
//! give every call its own scope and must not run on the coordinating task.

pub mod python;

pub use python::PythonSandbox;

use crate::error::SandboxError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Variable the generated code stores its summary in.
pub const RESULT_VARIABLE: &str = "final_answer";

/// Variable the generated code stores its chart path in.
pub const ARTIFACT_VARIABLE: &str = "image_path";

/// One program to run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    /// Unique path the program may write its chart to.
    pub artifact_path: PathBuf,
}

/// Values read back from the program's scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    /// Value of [`RESULT_VARIABLE`], if it was set.
    pub final_answer: Option<String>,
    /// Chart file, only when it exists after the run.
    pub image_path: Option<PathBuf>,
    /// Anything the program printed.
    pub stdout: String,
}

/// Runs generated code against the dataset bindings.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutput, SandboxError>;

    /// Names bound in the program's scope, for the prompt.
    fn bindings(&self) -> &[&'static str];
}
