//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// InsightForge - multi-agent analyst for tabular datasets
///
/// Breaks a free-form question into quantitative and qualitative steps,
/// answers them with generated code and retrieval over the rows, and
/// merges everything into a narrative report.
///
/// Examples:
///   insightforge --data data/sales.csv
///   insightforge --data data/sales.csv --instructions "How did sales evolve by region?"
///   insightforge --data data/sales.csv --instructions-file ask.txt --format json
///   insightforge --data data/sales.csv --instructions "..." --plan-only
///   insightforge --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// CSV dataset to analyze
    ///
    /// Overrides `data.path` from the config file.
    #[arg(short, long, value_name = "FILE")]
    pub data: Option<PathBuf>,

    /// Analytical question to answer
    ///
    /// Without instructions the configured default plan runs.
    #[arg(short, long, value_name = "TEXT", conflicts_with = "instructions_file")]
    pub instructions: Option<String>,

    /// Read the analytical question from a file
    #[arg(long, value_name = "FILE")]
    pub instructions_file: Option<PathBuf>,

    /// Ollama model used for planning, code generation and writing
    ///
    /// Overrides `model.name` from the config file (default: llama3.2:latest).
    #[arg(short, long, value_name = "MODEL", env = "INSIGHTFORGE_MODEL")]
    pub model: Option<String>,

    /// Ollama model used for embeddings
    #[arg(long, value_name = "MODEL")]
    pub embedding_model: Option<String>,

    /// Ollama API endpoint URL (default: http://localhost:11434)
    #[arg(long, value_name = "URL", env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Output file path for the response (default: insight_report.md)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .insightforge.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Temperature for LLM responses (0.0 - 1.0, default: 0.1)
    #[arg(long, value_name = "TEMP")]
    pub temperature: Option<f32>,

    /// Request timeout in seconds for each model call
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Documents retrieved per qualitative question
    #[arg(long, value_name = "K")]
    pub top_k: Option<usize>,

    /// Vector index file
    #[arg(long, value_name = "FILE")]
    pub index_path: Option<PathBuf>,

    /// Directory for generated chart images
    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Print the plan and exit without running the agents
    #[arg(long)]
    pub plan_only: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .insightforge.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(top_k) = self.top_k {
            if top_k == 0 {
                return Err("Top-k must be at least 1".to_string());
            }
        }

        if let Some(ref path) = self.instructions_file {
            if !path.is_file() {
                return Err(format!("Instructions file does not exist: {}", path.display()));
            }
        }

        if self.plan_only && self.instructions.is_none() && self.instructions_file.is_none() {
            return Err("--plan-only needs --instructions or --instructions-file".to_string());
        }

        Ok(())
    }

    /// Resolve the user instructions from the flag or the file.
    pub fn user_instructions(&self) -> std::io::Result<Option<String>> {
        if let Some(ref text) = self.instructions {
            return Ok(Some(text.clone()));
        }
        match self.instructions_file {
            Some(ref path) => std::fs::read_to_string(path).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `general.verbose` from the config file; `--quiet`
    /// still wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
