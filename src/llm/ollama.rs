//! Ollama HTTP client.
//!
//! Uses `/api/chat` for completions (with `format: "json"` in structured
//! mode) and `/api/embed` for embeddings. Every request carries the client
//! timeout so a stalled server cannot hold a step forever.

use super::{CompletionClient, CompletionRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the Ollama client.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
        }
    }
}

impl From<&crate::config::ModelConfig> for OllamaConfig {
    fn from(config: &crate::config::ModelConfig) -> Self {
        Self {
            ollama_url: config.ollama_url.trim_end_matches('/').to_string(),
            model_name: config.name.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Completion client backed by an Ollama server.
pub struct OllamaClient {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_chat_request(&self, request: CompletionRequest) -> OllamaChatRequest<'_> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt,
        });

        OllamaChatRequest {
            model: &self.config.model_name,
            messages,
            stream: false,
            format: request.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
        } else if e.is_connect() {
            anyhow::anyhow!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.config.ollama_url
            )
        } else {
            anyhow::anyhow!("Failed to send request: {}", e)
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.ollama_url, path);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let json_mode = request.json_mode;
        let chat_request = self.build_chat_request(request);
        debug!(
            "Sending chat request ({} messages, json_mode={})",
            chat_request.messages.len(),
            json_mode
        );

        let chat_response: OllamaChatResponse = self
            .post("/api/chat", &chat_request)
            .await?
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OllamaEmbedRequest {
            model: &self.config.embedding_model,
            input: texts,
        };
        debug!("Embedding {} texts", texts.len());

        let response: OllamaEmbedResponse = self
            .post("/api/embed", &request)
            .await?
            .json()
            .await
            .context("Failed to parse Ollama embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            ));
        }

        Ok(response.embeddings)
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
