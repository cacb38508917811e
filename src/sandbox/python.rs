//! Out-of-process Python sandbox.
//!
//! Each call gets a fresh temporary directory holding the dataset as CSV,
//! the generated program and a small harness. The harness loads the data,
//! binds `df`, `pd`, `np`, `plt` and `sns`, runs the program in a scope
//! containing only those names, and writes the result variables to
//! `result.json`. The child process runs with a cleared environment and is
//! killed when the timeout expires.

use super::{CodeExecutor, ExecutionOutput, ExecutionRequest, ARTIFACT_VARIABLE, RESULT_VARIABLE};
use crate::config::SandboxConfig;
use crate::dataset::Dataset;
use crate::error::SandboxError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const DATA_FILE: &str = "data.csv";
const PROGRAM_FILE: &str = "program.py";
const HARNESS_FILE: &str = "harness.py";
const RESULT_FILE: &str = "result.json";

const BINDINGS: [&str; 5] = ["df", "pd", "np", "plt", "sns"];

const HARNESS: &str = r#"import json
import traceback

result = {"ok": False, "final_answer": None, "image_path": None, "error": None}
try:
    import numpy as np
    import pandas as pd
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as plt
    try:
        import seaborn as sns
    except ImportError:
        sns = None

    df = pd.read_csv("data.csv")
    with open("program.py", encoding="utf-8") as fh:
        source = fh.read()

    scope = {"__builtins__": __builtins__, "df": df, "pd": pd, "np": np, "plt": plt, "sns": sns}
    exec(compile(source, "<generated>", "exec"), scope)

    answer = scope.get("final_answer")
    image = scope.get("image_path")
    result["ok"] = True
    result["final_answer"] = None if answer is None else str(answer)
    result["image_path"] = None if image is None else str(image)
except BaseException as exc:
    result["error"] = "".join(traceback.format_exception_only(type(exc), exc)).strip()

with open("result.json", "w", encoding="utf-8") as fh:
    json.dump(result, fh)
"#;

#[derive(Debug, Deserialize)]
struct HarnessResult {
    ok: bool,
    final_answer: Option<String>,
    image_path: Option<String>,
    error: Option<String>,
}

/// Runs generated Python in a child interpreter.
pub struct PythonSandbox {
    interpreter: String,
    timeout: Duration,
    /// Cleaned dataset serialized once and shared by every call.
    dataset_csv: Arc<Vec<u8>>,
}

impl PythonSandbox {
    pub fn new(config: &SandboxConfig, dataset: &Dataset) -> anyhow::Result<Self> {
        Ok(Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            dataset_csv: Arc::new(dataset.to_csv()?),
        })
    }

    async fn prepare(&self, dir: &Path, code: &str) -> Result<(), SandboxError> {
        tokio::fs::write(dir.join(DATA_FILE), self.dataset_csv.as_slice()).await?;
        tokio::fs::write(dir.join(PROGRAM_FILE), code).await?;
        tokio::fs::write(dir.join(HARNESS_FILE), HARNESS).await?;
        Ok(())
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(HARNESS_FILE)
            .current_dir(dir)
            .env_clear()
            .env("HOME", dir)
            .env("MPLBACKEND", "Agg")
            .env("MPLCONFIGDIR", dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }
}

#[async_trait]
impl CodeExecutor for PythonSandbox {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutput, SandboxError> {
        let workdir = tempfile::Builder::new()
            .prefix("insightforge-sandbox-")
            .tempdir()?;
        self.prepare(workdir.path(), &request.code).await?;

        debug!(
            "Running generated code ({} bytes) in {}",
            request.code.len(),
            workdir.path().display()
        );

        let child = self
            .command(workdir.path())
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                interpreter: self.interpreter.clone(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("Generated code exceeded {}s, killed", self.timeout.as_secs());
                return Err(SandboxError::Timeout(self.timeout.as_secs()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let content = match tokio::fs::read_to_string(workdir.path().join(RESULT_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::Failed(failure_message(
                    &stderr,
                    output.status.code(),
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let mut parsed = parse_result(&content, stdout)?;

        if let Some(image) = parsed.image_path.take() {
            parsed.image_path =
                collect_artifact(&image, workdir.path(), &request.artifact_path).await;
        }

        Ok(parsed)
    }

    fn bindings(&self) -> &[&'static str] {
        &BINDINGS
    }
}

/// Decode `result.json`, turning a recorded exception into an error.
fn parse_result(content: &str, stdout: String) -> Result<ExecutionOutput, SandboxError> {
    let result: HarnessResult =
        serde_json::from_str(content).map_err(|e| SandboxError::Output(e.to_string()))?;

    if !result.ok {
        return Err(SandboxError::Failed(result.error.unwrap_or_else(|| {
            format!("generated code failed without setting {}", RESULT_VARIABLE)
        })));
    }

    Ok(ExecutionOutput {
        final_answer: result.final_answer,
        image_path: result
            .image_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from),
        stdout,
    })
}

/// Resolve the chart path reported in `image_path`.
///
/// Relative paths are resolved against the scratch directory and copied to
/// the allocated artifact path, since the scratch directory is deleted.
/// Paths that do not exist are dropped.
async fn collect_artifact(image: &Path, workdir: &Path, artifact_path: &Path) -> Option<PathBuf> {
    let resolved = if image.is_relative() {
        workdir.join(image)
    } else {
        image.to_path_buf()
    };

    let is_file = tokio::fs::metadata(&resolved)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        debug!("{} points at missing file {}", ARTIFACT_VARIABLE, resolved.display());
        return None;
    }

    if resolved.starts_with(workdir) {
        if let Err(e) = tokio::fs::copy(&resolved, artifact_path).await {
            warn!("Failed to keep chart {}: {}", resolved.display(), e);
            return None;
        }
        return Some(artifact_path.to_path_buf());
    }

    Some(resolved)
}

fn failure_message(stderr: &str, code: Option<i32>) -> String {
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    if tail.is_empty() {
        format!("interpreter exited with status {:?} and no output", code)
    } else {
        tail.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;

    #[test]
    fn test_harness_binds_only_declared_names() {
        for name in BINDINGS {
            assert!(HARNESS.contains(&format!("\"{}\": {}", name, name)));
        }
        assert!(HARNESS.contains(RESULT_VARIABLE));
        assert!(HARNESS.contains(ARTIFACT_VARIABLE));
        assert!(HARNESS.contains(DATA_FILE));
        assert!(HARNESS.contains(RESULT_FILE));
    }

    #[test]
    fn test_parse_result_success() {
        let output = parse_result(
            r#"{"ok": true, "final_answer": "Europe leads", "image_path": "", "error": null}"#,
            "printed".to_string(),
        )
        .unwrap();
        assert_eq!(output.final_answer.as_deref(), Some("Europe leads"));
        assert!(output.image_path.is_none());
        assert_eq!(output.stdout, "printed");
    }

    #[test]
    fn test_parse_result_missing_answer_is_not_an_error() {
        let output = parse_result(
            r#"{"ok": true, "final_answer": null, "image_path": null, "error": null}"#,
            String::new(),
        )
        .unwrap();
        assert!(output.final_answer.is_none());
    }

    #[test]
    fn test_parse_result_exception() {
        let err = parse_result(
            r#"{"ok": false, "final_answer": null, "image_path": null, "error": "KeyError: 'Regio'"}"#,
            String::new(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'Regio'");
    }

    #[tokio::test]
    async fn test_collect_artifact_copies_out_of_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let keep = tempfile::tempdir().unwrap();
        std::fs::write(scratch.path().join("plot.png"), b"png").unwrap();
        let target = keep.path().join("chart-1.png");

        let kept = collect_artifact(Path::new("plot.png"), scratch.path(), &target).await;
        assert_eq!(kept.as_deref(), Some(target.as_path()));
        assert_eq!(std::fs::read(&target).unwrap(), b"png");

        let missing = collect_artifact(Path::new("missing.png"), scratch.path(), &target).await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_prepare_writes_scratch_files() {
        let sandbox = PythonSandbox::new(&SandboxConfig::default(), &sample_dataset()).unwrap();
        let scratch = tempfile::tempdir().unwrap();

        sandbox
            .prepare(scratch.path(), "final_answer = len(df)")
            .await
            .unwrap();

        let data = std::fs::read_to_string(scratch.path().join(DATA_FILE)).unwrap();
        assert!(data.starts_with("Model,Year,Region,Price_USD,Sales_Volume\n"));
        assert_eq!(
            std::fs::read_to_string(scratch.path().join(PROGRAM_FILE)).unwrap(),
            "final_answer = len(df)"
        );
        assert_eq!(
            std::fs::read_to_string(scratch.path().join(HARNESS_FILE)).unwrap(),
            HARNESS
        );
    }

    #[test]
    fn test_failure_message_keeps_tail() {
        let stderr = (1..=8).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let message = failure_message(&stderr, Some(1));
        assert!(message.starts_with("line 4"));
        assert!(message.ends_with("line 8"));
        assert!(failure_message("", Some(2)).contains("Some(2)"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let config = SandboxConfig {
            interpreter: "insightforge-no-such-interpreter".to_string(),
            ..SandboxConfig::default()
        };
        let sandbox = PythonSandbox::new(&config, &sample_dataset()).unwrap();
        let err = sandbox
            .execute(ExecutionRequest {
                code: "final_answer = 1".to_string(),
                artifact_path: PathBuf::from("unused.png"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
