//! InsightForge - multi-agent analyst for tabular datasets
//!
//! A CLI tool that plans an analysis with a local Ollama model, answers
//! numeric questions with generated code and contextual questions with
//! retrieval over the dataset rows, and compiles a narrative report.
//!
//! Exit codes:
//!   0 - Success (individual failed steps are reported, not fatal)
//!   1 - Runtime error (missing dataset, ingestion, config, write failure, etc.)

mod agent;
mod analysis;
mod cli;
mod config;
mod dataset;
mod error;
mod index;
mod llm;
mod models;
mod pipeline;
mod report;
mod sandbox;

#[cfg(test)]
mod test_utils;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use error::DatasetError;
use models::{AgentStatus, ReportRequest};
use pipeline::AnalysisContext;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load config before logging so `general.verbose` can raise the level
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config);

    info!("InsightForge v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match source {
        ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
        ConfigSource::Defaults => debug!("No config file found, using defaults"),
        ConfigSource::Unreadable(e) => warn!("Failed to load config: {}", e),
    }

    config.merge_with_args(&args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            if let Some(DatasetError::NotFound(path)) = e.downcast_ref::<DatasetError>() {
                eprintln!("\n❌ Dataset not found: {}", path.display());
            } else {
                eprintln!("\n❌ Error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .insightforge.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the model, dataset cleaning, default plan and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run one analysis request. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let request = ReportRequest {
        user_instructions: args
            .user_instructions()
            .context("Failed to read instructions file")?,
    };

    println!("📥 Loading dataset: {}", config.data.path.display());
    let ctx = AnalysisContext::from_config(config, !args.quiet)?;
    println!(
        "   {} rows, {} columns",
        ctx.dataset.row_count(),
        ctx.dataset.columns().len()
    );

    if args.plan_only {
        return handle_plan_only(&ctx, &request).await;
    }

    println!("\n🤖 Running analysis...");
    println!("   Model: {}", ctx.config.model.name);
    println!("   Ollama: {}", ctx.config.model.ollama_url);
    println!("   Index: {}", ctx.config.index.path.display());

    let response = pipeline::generate_report(&ctx, &request).await?;

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&response)?,
        OutputFormat::Markdown => {
            report::generate_markdown_report(&response, ctx.config.report.include_code)
        }
    };

    let output_path = PathBuf::from(&ctx.config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write response to {}", output_path.display()))?;

    println!("\n📊 Analysis Summary:");
    println!(
        "   Plan: {} steps ({:?})",
        response.metadata.steps_total, response.metadata.plan_source
    );
    for section in &response.sections {
        let failed = section
            .quantitative
            .iter()
            .map(|q| q.status)
            .chain(section.qualitative.iter().map(|q| q.status))
            .any(|s| s == AgentStatus::Error);
        let marker = if failed || section.narrative_failed {
            "⚠️ "
        } else {
            "✅"
        };
        println!("   {} {}", marker, section.title);
    }
    if response.metadata.steps_failed > 0 {
        warn!("{} steps failed", response.metadata.steps_failed);
    }
    println!("   Duration: {:.1}s", response.metadata.duration_seconds);
    println!("   Document: {}", response.document_path.display());
    println!(
        "\n✅ Analysis complete! Response saved to: {}",
        output_path.display()
    );

    Ok(0)
}

/// Handle --plan-only: print the plan and exit without running agents.
async fn handle_plan_only(ctx: &AnalysisContext, request: &ReportRequest) -> Result<i32> {
    println!("\n🔍 Plan only: no agents will run...\n");

    let (steps, source) = pipeline::plan(ctx, request).await;
    println!("   Plan source: {:?}\n", source);
    for (i, step) in steps.iter().enumerate() {
        println!(
            "   {}. [{}] {} - {}",
            i + 1,
            step.kind,
            step.section_title(),
            step.query
        );
    }

    println!("\n✅ Plan complete. Only the planning model was called.");
    Ok(0)
}

/// Where the effective configuration came from.
enum ConfigSource {
    File(PathBuf),
    Defaults,
    /// The default file exists but could not be parsed.
    Unreadable(anyhow::Error),
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so the source is returned for the caller
/// to log.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::File(PathBuf::from(CONFIG_FILE_NAME)))),
        Ok(None) => Ok((Config::default(), ConfigSource::Defaults)),
        Err(e) => Ok((Config::default(), ConfigSource::Unreadable(e))),
    }
}
