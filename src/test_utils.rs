//! Scripted fakes for the model, sandbox and index seams.

use crate::error::SandboxError;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::sandbox::{CodeExecutor, ExecutionOutput, ExecutionRequest};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

const VOCAB: [&str; 6] = ["europe", "asia", "america", "price", "sales", "regulation"];

type Reply = std::result::Result<String, String>;

/// Completion client that answers from a fixed script.
///
/// The first rule whose needle occurs in the prompt or system prompt wins;
/// otherwise the default reply is used. Embeddings are keyword counts.
pub struct ScriptedClient {
    default: Reply,
    rules: Vec<(String, Reply, Option<Duration>)>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            default: Ok(reply.into()),
            rules: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            default: Err(error.into()),
            rules: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(reply.into()), None));
        self
    }

    pub fn fail_on(mut self, needle: impl Into<String>, error: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Err(error.into()), None));
        self
    }

    /// Answer `needle` only after sleeping for `delay`.
    pub fn slow_on(
        mut self,
        needle: impl Into<String>,
        reply: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.rules.push((needle.into(), Ok(reply.into()), Some(delay)));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let haystack = format!(
            "{}\n{}",
            request.system.as_deref().unwrap_or_default(),
            request.prompt
        );
        self.requests.lock().unwrap().push(request);

        let (reply, delay) = self
            .rules
            .iter()
            .find(|(needle, _, _)| haystack.contains(needle.as_str()))
            .map(|(_, reply, delay)| (reply.clone(), *delay))
            .unwrap_or_else(|| (self.default.clone(), None));

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply.map_err(|e| anyhow::anyhow!(e))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect()
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

type Handler =
    dyn Fn(&ExecutionRequest) -> std::result::Result<ExecutionOutput, SandboxError> + Send + Sync;

/// Code executor driven by a closure.
pub struct FakeExecutor {
    handler: Box<Handler>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl FakeExecutor {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ExecutionRequest) -> std::result::Result<ExecutionOutput, SandboxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every run sets `final_answer` to `answer`.
    pub fn answering(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self::new(move |_| {
            Ok(ExecutionOutput {
                final_answer: Some(answer.clone()),
                ..Default::default()
            })
        })
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeExecutor for FakeExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> std::result::Result<ExecutionOutput, SandboxError> {
        let result = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        result
    }

    fn bindings(&self) -> &[&'static str] {
        &["df", "pd", "np", "plt", "sns"]
    }
}
