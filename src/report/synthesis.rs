//! Narrative synthesis.
//!
//! Turns grouped step results into one prose document: one completion call
//! per section, issued concurrently, reassembled in section order.

use crate::analysis::{SectionGroup, SectionMap};
use crate::llm::{CompletionClient, CompletionRequest};
use crate::models::{AgentResult, StepOutcome};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a Lead Analyst writing one section of a business report. \
Write clear prose grounded only in the findings you are given. \
Do not invent figures and do not present unavailable findings as facts.";

const NO_FINDINGS: &str = "No findings were available for this section.";

/// Narrative for one section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionNarrative {
    pub title: String,
    pub narrative: String,
    /// The narrative is a placeholder built from the raw insights.
    pub failed: bool,
}

/// The assembled document.
#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub text: String,
    pub sections: Vec<SectionNarrative>,
}

/// Writes section narratives and the final document.
pub struct SynthesisEngine {
    client: Arc<dyn CompletionClient>,
    output_dir: PathBuf,
    title: String,
}

impl SynthesisEngine {
    pub fn new(client: Arc<dyn CompletionClient>, output_dir: &Path, title: &str) -> Self {
        Self {
            client,
            output_dir: output_dir.to_path_buf(),
            title: title.to_string(),
        }
    }

    /// Compile all sections into one document.
    pub async fn compile(&self, sections: &SectionMap) -> CompiledDocument {
        info!("Synthesizing {} sections", sections.len());

        let narratives: Vec<SectionNarrative> =
            join_all(sections.values().map(|group| self.narrate(group))).await;

        let failed = narratives.iter().filter(|n| n.failed).count();
        if failed > 0 {
            warn!("{} of {} section narratives used placeholders", failed, narratives.len());
        }

        let text = self.render(sections, &narratives);
        CompiledDocument {
            text,
            sections: narratives,
        }
    }

    /// Write the document to `output_dir/report-<timestamp>.md`.
    pub fn persist(&self, text: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create report directory: {}", self.output_dir.display())
        })?;

        let name = format!("report-{}.md", Utc::now().format("%Y%m%d-%H%M%S%3f"));
        let path = self.output_dir.join(name);
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;

        info!("Report written to {}", path.display());
        Ok(path)
    }

    async fn narrate(&self, group: &SectionGroup) -> SectionNarrative {
        let prompt = section_prompt(group);
        debug!("Synthesis prompt for '{}' is {} chars", group.title, prompt.len());

        let answer = self
            .client
            .complete(CompletionRequest::new(prompt).with_system(SYSTEM_PROMPT))
            .await;

        match answer {
            Ok(text) if !text.trim().is_empty() => SectionNarrative {
                title: group.title.clone(),
                narrative: text.trim().to_string(),
                failed: false,
            },
            Ok(_) => {
                warn!("Empty narrative for section '{}'", group.title);
                placeholder(group)
            }
            Err(e) => {
                warn!("Narrative for section '{}' failed: {}", group.title, e);
                placeholder(group)
            }
        }
    }

    fn render(&self, sections: &SectionMap, narratives: &[SectionNarrative]) -> String {
        let mut output = format!("# {}\n\n", self.title);

        for (group, narrative) in sections.values().zip(narratives) {
            output.push_str(&format!("## {}\n\n", narrative.title));
            output.push_str(&narrative.narrative);
            output.push_str("\n\n");

            if let Some(AgentResult::Quantitative(result)) =
                group.quantitative.as_ref().map(|o| &o.result)
            {
                if let Some(ref artifact) = result.artifact {
                    output.push_str(&format!("![{}]({})\n\n", narrative.title, artifact.display()));
                }
            }
        }

        output
    }
}

fn section_prompt(group: &SectionGroup) -> String {
    let mut prompt = format!("SECTION: {}\n\nSOURCE MATERIAL:\n", group.title);

    if let Some(ref outcome) = group.quantitative {
        prompt.push_str(&source_block("Quantitative finding", outcome));
    }
    if let Some(ref outcome) = group.qualitative {
        prompt.push_str(&source_block("Qualitative finding", outcome));
    }

    prompt.push_str(
        "\nTASK:\nWrite a concise narrative (one to three paragraphs) for this section that \
         combines the findings above. If a finding is marked not available, mention that \
         the information could not be obtained and do not guess it.\n",
    );
    prompt
}

fn source_block(label: &str, outcome: &StepOutcome) -> String {
    let mut block = format!("\n{} (task: {}):\n", label, outcome.step.query);

    if !outcome.result.is_ok() {
        block.push_str(&format!(
            "not available ({})\n",
            outcome.result.error().unwrap_or("unknown error")
        ));
        return block;
    }

    block.push_str(outcome.result.insight());
    block.push('\n');

    match &outcome.result {
        AgentResult::Quantitative(result) => {
            if let Some(ref artifact) = result.artifact {
                block.push_str(&format!("A chart is available at {}.\n", artifact.display()));
            }
        }
        AgentResult::Qualitative(result) => {
            if let Some(ref context) = result.context_used {
                block.push_str(&format!("Supporting records:\n{}\n", context));
            }
        }
    }

    block
}

/// Narrative built from the raw insights when the model call fails.
fn placeholder(group: &SectionGroup) -> SectionNarrative {
    let insights: Vec<&str> = group
        .outcomes()
        .filter(|o| o.result.is_ok())
        .map(|o| o.result.insight())
        .collect();

    let narrative = if insights.is_empty() {
        NO_FINDINGS.to_string()
    } else {
        format!("Narrative unavailable; raw findings:\n\n{}", insights.join("\n\n"))
    };

    SectionNarrative {
        title: group.title.clone(),
        narrative,
        failed: true,
    }
}
