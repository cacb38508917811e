//! Data models for the analysis pipeline.
//!
//! This module contains the core data structures shared by the planner,
//! the agents, the fan-out executor and the report generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Insight used when generated code finishes without setting `final_answer`.
pub const PLACEHOLDER_INSIGHT: &str = "Calculation complete.";

/// Section title for steps that did not declare one.
pub const DEFAULT_SECTION: &str = "General Analysis";

/// Which specialist agent handles a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Numeric analysis through generated code.
    #[serde(alias = "high_level", alias = "QUANTITATIVE", alias = "Quantitative")]
    Quantitative,
    /// Retrieval-augmented research over the index.
    #[serde(alias = "detailed", alias = "QUALITATIVE", alias = "Qualitative")]
    Qualitative,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Quantitative => write!(f, "Quantitative"),
            StepKind::Qualitative => write!(f, "Qualitative"),
        }
    }
}

/// One unit of planned work, scoped to a report section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStep {
    /// Report section this step contributes to (may be blank).
    #[serde(default, deserialize_with = "null_as_empty")]
    pub section: String,
    /// Agent routing.
    #[serde(alias = "type")]
    pub kind: StepKind,
    /// Natural-language task or research question.
    pub query: String,
}

/// Planners sometimes emit `"section": null`; treat it like a blank section.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl AnalysisStep {
    pub fn new(section: impl Into<String>, kind: StepKind, query: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            kind,
            query: query.into(),
        }
    }

    /// Section title with the default applied to blank sections.
    pub fn section_title(&self) -> &str {
        let trimmed = self.section.trim();
        if trimmed.is_empty() {
            DEFAULT_SECTION
        } else {
            trimmed
        }
    }
}

/// Outcome status of a single agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Ok,
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Ok => write!(f, "ok"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

fn non_empty_error(error: impl Into<String>) -> String {
    let error = error.into();
    if error.trim().is_empty() {
        "unknown error".to_string()
    } else {
        error
    }
}

/// Result of the quantitative (code-generating) agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitativeResult {
    pub status: AgentStatus,
    pub insight: String,
    /// Chart written by the generated code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// The code that was (or would have been) executed.
    pub generated_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuantitativeResult {
    /// Successful run. A blank insight becomes the generic placeholder.
    pub fn ok(
        insight: impl Into<String>,
        artifact: Option<PathBuf>,
        generated_code: String,
    ) -> Self {
        let insight = insight.into();
        let insight = if insight.trim().is_empty() {
            PLACEHOLDER_INSIGHT.to_string()
        } else {
            insight
        };
        Self {
            status: AgentStatus::Ok,
            insight,
            artifact,
            generated_code,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, generated_code: String) -> Self {
        Self {
            status: AgentStatus::Error,
            insight: String::new(),
            artifact: None,
            generated_code,
            error: Some(non_empty_error(error)),
        }
    }
}

/// Result of the qualitative (retrieval) agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitativeResult {
    pub status: AgentStatus,
    pub insight: String,
    /// Retrieved documents handed to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QualitativeResult {
    pub fn ok(insight: impl Into<String>, context_used: String) -> Self {
        let insight = insight.into();
        if insight.trim().is_empty() {
            return Self::failed("model returned an empty answer", String::new());
        }
        Self {
            status: AgentStatus::Ok,
            insight,
            context_used: Some(context_used),
            error: None,
        }
    }

    /// Failed run with a best-effort insight (may be empty).
    pub fn failed(error: impl Into<String>, insight: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Error,
            insight: insight.into(),
            context_used: None,
            error: Some(non_empty_error(error)),
        }
    }
}

/// Result of either agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "agent", rename_all = "lowercase")]
pub enum AgentResult {
    Quantitative(QuantitativeResult),
    Qualitative(QualitativeResult),
}

impl AgentResult {
    /// Error result of the right variant for a step kind.
    pub fn failure(kind: StepKind, error: impl Into<String>) -> Self {
        match kind {
            StepKind::Quantitative => {
                AgentResult::Quantitative(QuantitativeResult::failed(error, String::new()))
            }
            StepKind::Qualitative => {
                AgentResult::Qualitative(QualitativeResult::failed(error, String::new()))
            }
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            AgentResult::Quantitative(_) => StepKind::Quantitative,
            AgentResult::Qualitative(_) => StepKind::Qualitative,
        }
    }

    pub fn status(&self) -> AgentStatus {
        match self {
            AgentResult::Quantitative(r) => r.status,
            AgentResult::Qualitative(r) => r.status,
        }
    }

    pub fn insight(&self) -> &str {
        match self {
            AgentResult::Quantitative(r) => &r.insight,
            AgentResult::Qualitative(r) => &r.insight,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AgentResult::Quantitative(r) => r.error.as_deref(),
            AgentResult::Qualitative(r) => r.error.as_deref(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == AgentStatus::Ok
    }
}

/// An agent result tagged with the step that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: AnalysisStep,
    pub result: AgentResult,
}

/// Inbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Free-form analytical question; `None` selects the default plan.
    #[serde(default)]
    pub user_instructions: Option<String>,
}

impl ReportRequest {
    /// Instructions with surrounding whitespace removed; blank counts as absent.
    pub fn instructions(&self) -> Option<&str> {
        self.user_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Where the executed plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    /// Produced by the planning model.
    Model,
    /// No instructions were given.
    Default,
    /// Planning failed and the default plan was substituted.
    Fallback,
}

/// Summary of the loaded dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub status: String,
    pub source: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// First rows as JSON objects.
    pub preview: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Quantitative part of a section in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantitativeEntry {
    pub query: String,
    pub status: AgentStatus,
    pub code: String,
    pub insight: String,
    /// Base64-encoded chart image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Qualitative part of a section in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitativeEntry {
    pub query: String,
    pub status: AgentStatus,
    pub insight: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One section of the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionEntry {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantitative: Option<QuantitativeEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualitative: Option<QualitativeEntry>,
    pub narrative: String,
    /// True when the narrative is a placeholder because synthesis failed.
    pub narrative_failed: bool,
}

/// Metadata about a report run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub dataset: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub plan_source: PlanSource,
    pub steps_total: usize,
    pub steps_failed: usize,
    pub duration_seconds: f64,
}

/// Outbound response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub metadata: ReportMetadata,
    pub ingestion: IngestionSummary,
    pub plan: Vec<AnalysisStep>,
    pub sections: Vec<SectionEntry>,
    /// The compiled narrative document.
    pub document: String,
    /// Where the document was written.
    pub document_path: PathBuf,
}
