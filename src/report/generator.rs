//! Response rendering.
//!
//! Builds the per-section entries of the outbound response and renders the
//! whole response as Markdown or JSON.

use super::synthesis::CompiledDocument;
use crate::analysis::SectionMap;
use crate::models::{
    AgentResult, AgentStatus, QualitativeEntry, QuantitativeEntry, ReportMetadata,
    ReportResponse, SectionEntry,
};
use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use std::path::Path;
use tracing::warn;

/// Pair each section's results with its narrative.
pub fn build_section_entries(
    sections: &SectionMap,
    document: &CompiledDocument,
) -> Vec<SectionEntry> {
    sections
        .values()
        .zip(&document.sections)
        .map(|(group, narrative)| {
            let quantitative = group.quantitative.as_ref().and_then(|o| match &o.result {
                AgentResult::Quantitative(r) => Some(QuantitativeEntry {
                    query: o.step.query.clone(),
                    status: r.status,
                    code: r.generated_code.clone(),
                    insight: r.insight.clone(),
                    image: r.artifact.as_deref().and_then(encode_image),
                    error: r.error.clone(),
                }),
                _ => None,
            });

            let qualitative = group.qualitative.as_ref().and_then(|o| match &o.result {
                AgentResult::Qualitative(r) => Some(QualitativeEntry {
                    query: o.step.query.clone(),
                    status: r.status,
                    insight: r.insight.clone(),
                    context: r.context_used.clone().unwrap_or_default(),
                    error: r.error.clone(),
                }),
                _ => None,
            });

            SectionEntry {
                title: group.title.clone(),
                quantitative,
                qualitative,
                narrative: narrative.narrative.clone(),
                narrative_failed: narrative.failed,
            }
        })
        .collect()
}

/// Read a chart and encode it as base64. Unreadable files are dropped.
pub fn encode_image(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(general_purpose::STANDARD.encode(bytes)),
        Err(e) => {
            warn!("Failed to read chart {}: {}", path.display(), e);
            None
        }
    }
}

/// Render the response as Markdown.
pub fn generate_markdown_report(response: &ReportResponse, include_code: bool) -> String {
    let mut output = String::new();

    output.push_str("# InsightForge Report\n\n");
    output.push_str(&generate_metadata_section(&response.metadata));
    output.push_str(&generate_ingestion_section(response));
    output.push_str(&generate_plan_section(response));

    output.push_str("## Sections\n\n");
    for section in &response.sections {
        output.push_str(&generate_section_block(section, include_code));
    }

    output.push_str("## Document\n\n");
    output.push_str(&format!(
        "The compiled document was saved to `{}`.\n\n",
        response.document_path.display()
    ));

    output.push_str(&generate_footer());
    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Dataset:** {}\n", metadata.dataset));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!("- **Plan Source:** {:?}\n", metadata.plan_source));
    section.push_str(&format!("- **Steps:** {}\n", metadata.steps_total));
    if metadata.steps_failed > 0 {
        section.push_str(&format!("- **Steps Failed:** {}\n", metadata.steps_failed));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1} seconds\n\n",
        metadata.duration_seconds
    ));

    section
}

fn generate_ingestion_section(response: &ReportResponse) -> String {
    let ingestion = &response.ingestion;
    let mut section = String::new();

    section.push_str("## Dataset\n\n");
    section.push_str(&format!(
        "{} rows loaded from `{}` ({}).\n\n",
        ingestion.row_count, ingestion.source, ingestion.status
    ));
    section.push_str(&format!("**Columns:** {}\n\n", ingestion.columns.join(", ")));

    section
}

fn generate_plan_section(response: &ReportResponse) -> String {
    let mut section = String::new();

    section.push_str("## Plan\n\n");
    section.push_str("| # | Section | Type | Task |\n");
    section.push_str("|---|---------|------|------|\n");
    for (i, step) in response.plan.iter().enumerate() {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            i + 1,
            step.section_title(),
            step.kind,
            step.query.replace('|', "\\|")
        ));
    }
    section.push('\n');

    section
}

fn status_marker(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Ok => "✅",
        AgentStatus::Error => "❌",
    }
}

fn generate_section_block(section: &SectionEntry, include_code: bool) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {}\n\n", section.title));

    if let Some(ref quant) = section.quantitative {
        block.push_str(&format!(
            "**{} Quantitative:** {}\n\n",
            status_marker(quant.status),
            quant.query
        ));
        if let Some(ref error) = quant.error {
            block.push_str(&format!("> Error: {}\n\n", error));
        } else {
            block.push_str(&format!("{}\n\n", quant.insight));
        }
        if include_code && !quant.code.is_empty() {
            block.push_str("```python\n");
            block.push_str(&quant.code);
            block.push_str("\n```\n\n");
        }
        if quant.image.is_some() {
            block.push_str("*Chart attached (base64 in JSON output).*\n\n");
        }
    }

    if let Some(ref qual) = section.qualitative {
        block.push_str(&format!(
            "**{} Qualitative:** {}\n\n",
            status_marker(qual.status),
            qual.query
        ));
        if let Some(ref error) = qual.error {
            block.push_str(&format!("> Error: {}\n\n", error));
        }
        if !qual.insight.is_empty() {
            block.push_str(&format!("{}\n\n", qual.insight));
        }
    }

    block.push_str("**Narrative**");
    if section.narrative_failed {
        block.push_str(" *(placeholder)*");
    }
    block.push_str("\n\n");
    block.push_str(&section.narrative);
    block.push_str("\n\n");

    block
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by InsightForge v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Render the response as pretty JSON.
pub fn generate_json_report(response: &ReportResponse) -> Result<String> {
    serde_json::to_string_pretty(response).map_err(Into::into)
}
