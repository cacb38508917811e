//! Request pipeline.
//!
//! An [`AnalysisContext`] holds everything one request needs: the dataset,
//! the model client, the vector index, the code executor and the effective
//! configuration. It is built once per run and passed explicitly.

use crate::agent::{Planner, QualitativeAgent, QuantitativeAgent};
use crate::analysis::{count_failed, group_by_section, kind_distribution, StepExecutor};
use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::DatasetError;
use crate::index::{PersistentIndex, VectorIndex};
use crate::llm::{CompletionClient, OllamaClient, OllamaConfig};
use crate::models::{
    AnalysisStep, IngestionSummary, PlanSource, ReportMetadata, ReportRequest, ReportResponse,
};
use crate::report::{build_section_entries, SynthesisEngine};
use crate::sandbox::{CodeExecutor, PythonSandbox};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Request-scoped collaborators and settings.
pub struct AnalysisContext {
    pub config: Config,
    pub dataset: Arc<Dataset>,
    pub client: Arc<dyn CompletionClient>,
    pub index: Arc<dyn VectorIndex>,
    pub executor: Arc<dyn CodeExecutor>,
    /// Draw a progress bar during ingestion.
    pub show_progress: bool,
}

impl AnalysisContext {
    /// Build the production collaborators from configuration.
    ///
    /// A missing or unreadable dataset is returned as [`DatasetError`] inside
    /// the error chain so callers can tell it apart.
    pub fn from_config(config: Config, show_progress: bool) -> Result<Self> {
        let dataset = load_dataset(&config)?;

        let client: Arc<dyn CompletionClient> =
            Arc::new(OllamaClient::new(OllamaConfig::from(&config.model))?);
        let index: Arc<dyn VectorIndex> =
            Arc::new(PersistentIndex::open(&config.index.path, client.clone())?);
        let executor: Arc<dyn CodeExecutor> =
            Arc::new(PythonSandbox::new(&config.sandbox, &dataset)?);

        Ok(Self {
            config,
            dataset: Arc::new(dataset),
            client,
            index,
            executor,
            show_progress,
        })
    }
}

/// Load the configured dataset.
pub fn load_dataset(config: &Config) -> Result<Dataset, DatasetError> {
    Dataset::load(&config.data.path, &config.data)
}

/// Summary of the loaded dataset for the response.
pub fn ingestion_summary(dataset: &Dataset, preview_rows: usize) -> IngestionSummary {
    IngestionSummary {
        status: "success".to_string(),
        source: dataset.source().display().to_string(),
        row_count: dataset.row_count(),
        columns: dataset.column_names(),
        preview: dataset.preview_records(preview_rows),
    }
}

/// Decide the plan for a request.
///
/// Without instructions the configured default plan is used. A planning
/// failure is logged and answered with the same default plan.
pub async fn plan(
    ctx: &AnalysisContext,
    request: &ReportRequest,
) -> (Vec<AnalysisStep>, PlanSource) {
    let default_steps = ctx.config.planner.default_steps.clone();

    let Some(instructions) = request.instructions() else {
        info!("No instructions given, using the default plan");
        return (default_steps, PlanSource::Default);
    };

    let planner = Planner::new(ctx.client.clone(), ctx.config.planner.required_coverage.clone());
    let preview = ctx.dataset.sample_preview(ctx.config.data.preview_rows);

    match planner
        .generate_plan(instructions, &ctx.dataset.column_list(), &preview)
        .await
    {
        Ok(steps) => (steps, PlanSource::Model),
        Err(e) => {
            warn!("Planning failed ({}), falling back to the default plan", e);
            (default_steps, PlanSource::Fallback)
        }
    }
}

/// Run a full request: ingest, plan, execute, group, synthesize, persist.
pub async fn generate_report(
    ctx: &AnalysisContext,
    request: &ReportRequest,
) -> Result<ReportResponse> {
    let started = Instant::now();

    // Ingestion failures are fatal.
    let qualitative = QualitativeAgent::new(
        ctx.client.clone(),
        ctx.index.clone(),
        ctx.config.index.top_k,
    );
    let ingest = qualitative
        .ingest_if_empty(&ctx.dataset, &ctx.config.index, ctx.show_progress)
        .await
        .context("Failed to ingest dataset into the vector index")?;
    if ingest.skipped {
        debug!("Reusing the existing index");
    } else {
        debug!("Ingestion added {} documents in {} batches", ingest.documents, ingest.batches);
    }

    let quantitative = QuantitativeAgent::new(
        ctx.client.clone(),
        ctx.executor.clone(),
        &ctx.dataset,
        &ctx.config.sandbox.artifacts_dir,
    )?;

    let (steps, plan_source) = plan(ctx, request).await;
    info!("Plan has {} steps ({:?})", steps.len(), plan_source);

    let executor = StepExecutor::new(
        Arc::new(quantitative),
        Arc::new(qualitative),
        Duration::from_secs(ctx.config.analysis.step_timeout_seconds),
    );
    let outcomes = executor.run(&steps).await;
    let steps_failed = count_failed(&outcomes);
    let (quant, qual) = kind_distribution(&outcomes);
    debug!("{} quantitative and {} qualitative results", quant, qual);

    let sections = group_by_section(outcomes);

    let engine = SynthesisEngine::new(
        ctx.client.clone(),
        &ctx.config.report.output_dir,
        &ctx.config.report.title,
    );
    let document = engine.compile(&sections).await;
    let document_path = engine.persist(&document.text)?;

    let response = ReportResponse {
        metadata: ReportMetadata {
            dataset: ctx.dataset.source().display().to_string(),
            generated_at: Utc::now(),
            model_used: ctx.client.model_name().to_string(),
            plan_source,
            steps_total: steps.len(),
            steps_failed,
            duration_seconds: started.elapsed().as_secs_f64(),
        },
        ingestion: ingestion_summary(&ctx.dataset, ctx.config.data.preview_rows),
        plan: steps,
        sections: build_section_entries(&sections, &document),
        document: document.text,
        document_path,
    };

    info!(
        "Report complete: {} sections, {} failed steps",
        response.sections.len(),
        response.metadata.steps_failed
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::index::PersistentIndex;
    use crate::models::{AgentStatus, StepKind};
    use crate::test_utils::{FakeExecutor, ScriptedClient};

    const PLAN: &str = r#"{"steps": [
        {"section": "Trend", "type": "quantitative", "query": "Sum Sales_Volume by Year"},
        {"section": "Trend", "type": "qualitative", "query": "Why did sales in Asia peak?"}
    ]}"#;

    fn context(
        client: ScriptedClient,
        dir: &std::path::Path,
    ) -> (AnalysisContext, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let mut config = Config::default();
        config.sandbox.artifacts_dir = dir.join("artifacts");
        config.report.output_dir = dir.join("reports");
        config.index.top_k = 2;

        let ctx = AnalysisContext {
            config,
            dataset: Arc::new(sample_dataset()),
            client: client.clone(),
            index: Arc::new(PersistentIndex::in_memory(client.clone())),
            executor: Arc::new(FakeExecutor::answering("2020: 120, 2021: 340, 2022: 210")),
            show_progress: false,
        };
        (ctx, client)
    }

    fn request(text: &str) -> ReportRequest {
        ReportRequest {
            user_instructions: Some(text.to_string()),
        }
    }

    #[tokio::test]
    async fn test_trend_scenario_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new("unused")
            .on("Technical Project Manager", PLAN)
            .on("Python Data Analyst", "```python\nfinal_answer = 'x'\n```")
            .on("Market Researcher", "Asia demand was driven by the X3.")
            .on("Lead Analyst", "Sales peaked in 2021 on Asian demand.");
        let (ctx, client) = context(client, dir.path());

        let response = generate_report(&ctx, &request("Show the sales trend")).await.unwrap();

        assert_eq!(response.metadata.plan_source, PlanSource::Model);
        assert_eq!(response.metadata.steps_total, 2);
        assert_eq!(response.metadata.steps_failed, 0);
        assert_eq!(response.metadata.model_used, "scripted-model");
        assert_eq!(response.ingestion.row_count, 3);
        assert_eq!(response.ingestion.preview.len(), 3);

        assert_eq!(response.sections.len(), 1);
        let trend = &response.sections[0];
        assert_eq!(trend.title, "Trend");
        assert_eq!(
            trend.quantitative.as_ref().unwrap().insight,
            "2020: 120, 2021: 340, 2022: 210"
        );
        assert_eq!(
            trend.qualitative.as_ref().unwrap().insight,
            "Asia demand was driven by the X3."
        );
        assert_eq!(trend.narrative, "Sales peaked in 2021 on Asian demand.");
        assert!(!trend.narrative_failed);

        assert!(response.document.starts_with("# Analysis Report\n\n## Trend"));
        assert_eq!(std::fs::read_to_string(&response.document_path).unwrap(), response.document);

        // plan, code, research, one narrative
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn test_no_instructions_uses_default_plan() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, client) = context(ScriptedClient::new("Some prose."), dir.path());

        let (steps, source) = plan(&ctx, &ReportRequest::default()).await;
        assert_eq!(source, PlanSource::Default);
        assert_eq!(steps, crate::config::default_steps());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_planning_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new("Some prose.")
            .on("Technical Project Manager", "I cannot produce JSON today.");
        let (ctx, _client) = context(client, dir.path());

        let (steps, source) = plan(&ctx, &request("anything")).await;
        assert_eq!(source, PlanSource::Fallback);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::Quantitative);
    }

    #[tokio::test]
    async fn test_failed_steps_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new("Narrative.")
            .on("Technical Project Manager", PLAN)
            .fail_on("Python Data Analyst", "model overloaded")
            .on("Market Researcher", "Context answer.");
        let (ctx, _client) = context(client, dir.path());

        let response = generate_report(&ctx, &request("trend")).await.unwrap();
        assert_eq!(response.metadata.steps_failed, 1);
        let quant = response.sections[0].quantitative.as_ref().unwrap();
        assert_eq!(quant.status, AgentStatus::Error);
        assert!(quant.error.as_deref().unwrap().contains("model overloaded"));
    }

    #[test]
    fn test_ingestion_summary() {
        let summary = ingestion_summary(&sample_dataset(), 2);
        assert_eq!(summary.status, "success");
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.preview.len(), 2);
        assert_eq!(summary.columns[0], "Model");
    }
}
