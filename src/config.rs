//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.insightforge.toml` files.

use crate::models::{AnalysisStep, StepKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".insightforge.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Dataset settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Vector index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Code execution settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Fan-out settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Planner settings.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default response output path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "insight_report.md".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Completion model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            embedding_model: default_embedding_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

/// Dataset loading and cleaning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path to the CSV source.
    #[serde(default = "default_data_path")]
    pub path: PathBuf,

    /// Columns coerced to numbers; unparseable cells become missing.
    #[serde(default)]
    pub numeric_columns: Vec<String>,

    /// Rows missing any of these columns are dropped.
    #[serde(default)]
    pub required_columns: Vec<String>,

    /// Rows shown to the planner and in the response preview.
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: default_data_path(),
            numeric_columns: Vec::new(),
            required_columns: Vec::new(),
            preview_rows: default_preview_rows(),
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/sales.csv")
}

fn default_preview_rows() -> usize {
    5
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// File backing the persistent index.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    /// Documents per `add` call during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Documents retrieved per qualitative query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Columns rendered into each row document (empty means all).
    #[serde(default)]
    pub document_columns: Vec<String>,

    /// Clear the index when the dataset fingerprint changed.
    #[serde(default)]
    pub rebuild_on_drift: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            batch_size: default_batch_size(),
            top_k: default_top_k(),
            document_columns: Vec::new(),
            rebuild_on_drift: false,
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from(".insightforge/index.json")
}

fn default_batch_size() -> usize {
    500
}

fn default_top_k() -> usize {
    5
}

/// Generated-code execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to run generated programs.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Directory receiving per-invocation chart images.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Wall-clock limit for one generated program.
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            artifacts_dir: default_artifacts_dir(),
            timeout_seconds: default_sandbox_timeout(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_sandbox_timeout() -> u64 {
    120
}

/// Fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Upper bound for one step, agent call included.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            step_timeout_seconds: default_step_timeout(),
        }
    }
}

fn default_step_timeout() -> u64 {
    600
}

/// Planner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Steps the plan must always cover, e.g. "a trend-over-time step".
    #[serde(default)]
    pub required_coverage: Vec<String>,

    /// Plan used without instructions or when planning fails.
    #[serde(default = "default_steps")]
    pub default_steps: Vec<AnalysisStep>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            required_coverage: Vec::new(),
            default_steps: default_steps(),
        }
    }
}

/// Built-in fallback plan.
pub fn default_steps() -> Vec<AnalysisStep> {
    vec![
        AnalysisStep::new(
            "Regional Performance",
            StepKind::Quantitative,
            "Calculate total Sales_Volume by Region. Sort descending.",
        ),
        AnalysisStep::new(
            "Regional Context",
            StepKind::Qualitative,
            "What regulations impact sales in the top region?",
        ),
    ]
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory receiving compiled narrative documents.
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,

    /// Top-level heading of the compiled document.
    #[serde(default = "default_title")]
    pub title: String,

    /// Include generated code in the Markdown response.
    #[serde(default = "default_true")]
    pub include_code: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
            title: default_title(),
            include_code: true,
        }
    }
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_title() -> String {
    "Analysis Report".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Optional flags only override when given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref ollama_url) = args.ollama_url {
            self.model.ollama_url = ollama_url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(ref embedding_model) = args.embedding_model {
            self.model.embedding_model = embedding_model.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(ref data) = args.data {
            self.data.path = data.clone();
        }

        if let Some(ref index_path) = args.index_path {
            self.index.path = index_path.clone();
        }
        if let Some(top_k) = args.top_k {
            self.index.top_k = top_k;
        }

        if let Some(ref artifacts_dir) = args.artifacts_dir {
            self.sandbox.artifacts_dir = artifacts_dir.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
