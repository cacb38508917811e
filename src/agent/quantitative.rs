//! Quantitative agent.
//!
//! Asks the model for a Python program that answers the task against the
//! dataset, runs it through the [`CodeExecutor`], and reports the value of
//! the result variable. Every failure is folded into an error-status result;
//! this agent never returns `Err`.

use super::extract_fenced_block;
use crate::dataset::Dataset;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::models::{AgentResult, QuantitativeResult};
use crate::sandbox::{CodeExecutor, ExecutionRequest, ARTIFACT_VARIABLE, RESULT_VARIABLE};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "You are a Python Data Analyst. You answer with code only.";

/// Code-generating analyst.
pub struct QuantitativeAgent {
    client: Arc<dyn CompletionClient>,
    executor: Arc<dyn CodeExecutor>,
    schema: String,
    artifacts_dir: PathBuf,
}

impl QuantitativeAgent {
    /// Create the agent; `artifacts_dir` is created and made absolute so
    /// generated code can write to it from any working directory.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        executor: Arc<dyn CodeExecutor>,
        dataset: &Dataset,
        artifacts_dir: &Path,
    ) -> Result<Self> {
        std::fs::create_dir_all(artifacts_dir).with_context(|| {
            format!("Failed to create artifacts directory: {}", artifacts_dir.display())
        })?;
        let artifacts_dir = std::fs::canonicalize(artifacts_dir).with_context(|| {
            format!("Failed to resolve artifacts directory: {}", artifacts_dir.display())
        })?;

        Ok(Self {
            client,
            executor,
            schema: dataset.schema_description(),
            artifacts_dir,
        })
    }

    /// Generate and run code for one task.
    pub async fn execute(&self, query: &str) -> AgentResult {
        AgentResult::Quantitative(self.run(query).await)
    }

    async fn run(&self, query: &str) -> QuantitativeResult {
        let artifact_path = self.allocate_artifact_path();
        let prompt = self.build_prompt(query, &artifact_path);

        let raw = match self
            .client
            .complete(CompletionRequest::new(prompt).with_system(SYSTEM_PROMPT))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Code generation failed for '{}': {}", query, e);
                return QuantitativeResult::failed(
                    format!("code generation failed: {}", e),
                    String::new(),
                );
            }
        };

        let code = extract_fenced_block(&raw, "python");
        if code.is_empty() {
            return QuantitativeResult::failed("model returned no code", code);
        }
        debug!("Generated {} lines of code for '{}'", code.lines().count(), query);

        let request = ExecutionRequest {
            code: code.clone(),
            artifact_path,
        };

        match self.executor.execute(request).await {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    debug!("Generated code printed {} bytes", output.stdout.len());
                }
                if output.final_answer.is_none() {
                    debug!("Generated code did not set {}", RESULT_VARIABLE);
                }
                info!("Quantitative step finished: {}", query);
                QuantitativeResult::ok(
                    output.final_answer.unwrap_or_default(),
                    output.image_path,
                    code,
                )
            }
            Err(e) => {
                warn!("Generated code failed for '{}': {}", query, e);
                QuantitativeResult::failed(e.to_string(), code)
            }
        }
    }

    /// Chart path unique to one invocation.
    fn allocate_artifact_path(&self) -> PathBuf {
        self.artifacts_dir
            .join(format!("chart-{}.png", Uuid::new_v4().simple()))
    }

    fn build_prompt(&self, query: &str, artifact_path: &Path) -> String {
        let bindings = self.executor.bindings().join(", ");
        format!(
            r#"You have a pandas DataFrame named `df`. Available names: {bindings}.

Schema:
{schema}

Task: {query}

Requirements:
1. Write Python code to solve the task.
2. Store a human-readable text summary of the result in a variable called `{result_var}`.
3. If the result is tabular or numeric and a chart helps, save it to '{artifact}' and store that path in `{artifact_var}`.
4. Do not read or write any other files.
5. Return ONLY the Python code inside a ```python fenced block."#,
            bindings = bindings,
            schema = self.schema,
            query = query,
            result_var = RESULT_VARIABLE,
            artifact = artifact_path.display(),
            artifact_var = ARTIFACT_VARIABLE,
        )
    }
}
