//! Concurrent step execution.
//!
//! Every step of a plan is dispatched to its agent at once and awaited
//! together. A step that errors or exceeds the step timeout becomes an
//! error-status result for that step only; the output always has one
//! outcome per input step, in input order.

use crate::agent::{QualitativeAgent, QuantitativeAgent};
use crate::models::{AgentResult, AnalysisStep, StepKind, StepOutcome};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Dispatches plan steps to the specialist agents.
pub struct StepExecutor {
    quantitative: Arc<QuantitativeAgent>,
    qualitative: Arc<QualitativeAgent>,
    step_timeout: Duration,
}

impl StepExecutor {
    pub fn new(
        quantitative: Arc<QuantitativeAgent>,
        qualitative: Arc<QualitativeAgent>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            quantitative,
            qualitative,
            step_timeout,
        }
    }

    /// Run all steps concurrently.
    pub async fn run(&self, steps: &[AnalysisStep]) -> Vec<StepOutcome> {
        info!("Executing {} steps", steps.len());
        let started = Instant::now();

        let results = join_all(steps.iter().enumerate().map(|(i, step)| async move {
            let result = self.run_step(i, step).await;
            StepOutcome {
                step: step.clone(),
                result,
            }
        }))
        .await;

        let failed = results.iter().filter(|o| !o.result.is_ok()).count();
        info!(
            "Executed {} steps in {:.1}s ({} failed)",
            results.len(),
            started.elapsed().as_secs_f64(),
            failed
        );
        results
    }

    async fn run_step(&self, index: usize, step: &AnalysisStep) -> AgentResult {
        debug!("Step {} [{}] {}", index + 1, step.kind, step.query);

        let work = async {
            match step.kind {
                StepKind::Quantitative => Ok(self.quantitative.execute(&step.query).await),
                StepKind::Qualitative => self.qualitative.execute(&step.query).await,
            }
        };

        match tokio::time::timeout(self.step_timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Step {} failed: {:#}", index + 1, e);
                AgentResult::failure(step.kind, format!("{:#}", e))
            }
            Err(_) => {
                warn!(
                    "Step {} exceeded {}s and was abandoned",
                    index + 1,
                    self.step_timeout.as_secs()
                );
                AgentResult::failure(
                    step.kind,
                    format!("step timed out after {}s", self.step_timeout.as_secs()),
                )
            }
        }
    }
}
