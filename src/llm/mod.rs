//! Language-model client abstraction.
//!
//! Every component that talks to a model goes through [`CompletionClient`],
//! so tests can substitute scripted fakes and the pipeline never depends on
//! a particular server.

pub mod ollama;

pub use ollama::{OllamaClient, OllamaConfig};

use anyhow::Result;
use async_trait::async_trait;

/// A single completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Optional system prompt.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Ask the server to constrain output to JSON.
    pub json_mode: bool,
}

impl CompletionRequest {
    /// Request with only a user prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            json_mode: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Request structured (JSON) output.
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Completion and embedding service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Return the raw text of the model's answer.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Embed each text; the output has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the completion model, for report metadata.
    fn model_name(&self) -> &str;
}
