//! Narrative synthesis and response rendering.

pub mod generator;
pub mod synthesis;

pub use generator::{build_section_entries, generate_json_report, generate_markdown_report};
pub use synthesis::SynthesisEngine;
