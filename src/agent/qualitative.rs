//! Qualitative agent.
//!
//! Answers research questions from rows retrieved out of the vector index.
//! Ingestion is idempotent: rows are only embedded when the index is empty.

use crate::config::IndexConfig;
use crate::dataset::Dataset;
use crate::index::VectorIndex;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::models::{AgentResult, QualitativeResult};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a Senior Market Researcher. Answer using only the provided context. \
If the context does not contain the answer, say so.";

/// Answer used when retrieval returns nothing.
pub const NO_CONTEXT_INSIGHT: &str = "No relevant data found.";

/// What an ingestion pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// The index already held documents, nothing was added.
    pub skipped: bool,
    /// Documents added in this pass.
    pub documents: usize,
    /// Number of `add` calls.
    pub batches: usize,
}

/// Retrieval-augmented researcher.
pub struct QualitativeAgent {
    client: Arc<dyn CompletionClient>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl QualitativeAgent {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        index: Arc<dyn VectorIndex>,
        top_k: usize,
    ) -> Self {
        Self {
            client,
            index,
            top_k,
        }
    }

    /// Embed every row of `dataset` unless the index already has documents.
    ///
    /// When the stored dataset fingerprint differs from the current one the
    /// index is either kept (with a warning) or cleared and rebuilt,
    /// depending on `config.rebuild_on_drift`.
    pub async fn ingest_if_empty(
        &self,
        dataset: &Dataset,
        config: &IndexConfig,
        show_progress: bool,
    ) -> Result<IngestReport> {
        let existing = self.index.count().await.context("Failed to count index documents")?;

        if existing > 0 {
            let stored = self.index.dataset_fingerprint().await?;
            let drifted = stored.as_deref().is_some_and(|fp| fp != dataset.fingerprint());

            if !drifted {
                info!("Index already holds {} documents, skipping ingestion", existing);
                return Ok(IngestReport {
                    skipped: true,
                    ..Default::default()
                });
            }

            if !config.rebuild_on_drift {
                warn!(
                    "Dataset changed since the index was built; answers may use stale rows \
                     (set index.rebuild_on_drift to rebuild)"
                );
                return Ok(IngestReport {
                    skipped: true,
                    ..Default::default()
                });
            }

            info!("Dataset changed since the index was built, rebuilding");
            self.index.clear().await.context("Failed to clear index")?;
        }

        let total = dataset.row_count();
        let batch_size = config.batch_size.max(1);
        info!("Ingesting {} rows in batches of {}", total, batch_size);

        let progress_bar = if show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut report = IngestReport::default();
        let mut start = 0;
        while start < total {
            let end = (start + batch_size).min(total);
            let mut documents = Vec::with_capacity(end - start);
            let mut ids = Vec::with_capacity(end - start);

            for row in start..end {
                if let Some(text) = dataset.describe_row(row, &config.document_columns) {
                    documents.push(text);
                    ids.push(row.to_string());
                }
            }

            debug!("Adding rows {}..{}", start, end);
            report.documents += documents.len();
            self.index
                .add(documents, ids)
                .await
                .with_context(|| format!("Failed to index rows {}..{}", start, end))?;
            report.batches += 1;

            if let Some(ref pb) = progress_bar {
                pb.set_position(end as u64);
            }
            start = end;
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Ingestion complete");
        }

        self.index
            .set_dataset_fingerprint(dataset.fingerprint())
            .await
            .context("Failed to record dataset fingerprint")?;

        info!("Indexed {} documents in {} batches", report.documents, report.batches);
        Ok(report)
    }

    /// Answer one research question.
    ///
    /// Retrieval errors propagate; an empty retrieval or a failed completion
    /// is reported as an error-status result.
    pub async fn execute(&self, query: &str) -> Result<AgentResult> {
        let documents = self
            .index
            .query(query, self.top_k)
            .await
            .with_context(|| format!("Retrieval failed for '{}'", query))?;

        if documents.is_empty() {
            warn!("No documents retrieved for '{}'", query);
            return Ok(AgentResult::Qualitative(QualitativeResult::failed(
                "empty retrieval",
                NO_CONTEXT_INSIGHT,
            )));
        }

        let context = documents.join("\n");
        debug!("Retrieved {} documents for '{}'", documents.len(), query);

        let prompt = format!("Context:\n{}\n\nQuestion: {}", context, query);
        let result = match self
            .client
            .complete(CompletionRequest::new(prompt).with_system(SYSTEM_PROMPT))
            .await
        {
            Ok(answer) => QualitativeResult::ok(answer.trim(), context),
            Err(e) => {
                warn!("Research answer failed for '{}': {}", query, e);
                QualitativeResult::failed(format!("completion failed: {}", e), "")
            }
        };

        Ok(AgentResult::Qualitative(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::index::PersistentIndex;
    use crate::models::AgentStatus;
    use crate::test_utils::ScriptedClient;

    fn setup(reply: &str) -> (QualitativeAgent, Arc<ScriptedClient>, Arc<PersistentIndex>) {
        let client = Arc::new(ScriptedClient::new(reply));
        let index = Arc::new(PersistentIndex::in_memory(client.clone()));
        let agent = QualitativeAgent::new(client.clone(), index.clone(), 2);
        (agent, client, index)
    }

    fn config(batch_size: usize) -> IndexConfig {
        IndexConfig {
            batch_size,
            ..IndexConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_runs_once() {
        let (agent, _client, index) = setup("unused");
        let dataset = sample_dataset();

        let first = agent.ingest_if_empty(&dataset, &config(2), false).await.unwrap();
        assert!(!first.skipped);
        assert_eq!(first.documents, 3);
        assert_eq!(first.batches, 2);

        let second = agent.ingest_if_empty(&dataset, &config(2), false).await.unwrap();
        assert!(second.skipped);
        assert_eq!(index.count().await.unwrap(), 3);
        assert_eq!(
            index.dataset_fingerprint().await.unwrap().as_deref(),
            Some(dataset.fingerprint())
        );
    }

    #[tokio::test]
    async fn test_drift_is_kept_unless_rebuild_requested() {
        let (agent, _client, index) = setup("unused");
        let dataset = sample_dataset();
        index
            .add(vec!["Region: Mars.".to_string()], vec!["0".to_string()])
            .await
            .unwrap();
        index.set_dataset_fingerprint("old").await.unwrap();

        let kept = agent.ingest_if_empty(&dataset, &config(10), false).await.unwrap();
        assert!(kept.skipped);
        assert_eq!(index.count().await.unwrap(), 1);

        let rebuild = IndexConfig {
            rebuild_on_drift: true,
            ..config(10)
        };
        let rebuilt = agent.ingest_if_empty(&dataset, &rebuild, false).await.unwrap();
        assert!(!rebuilt.skipped);
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_document_columns_restrict_row_text() {
        let (agent, _client, index) = setup("unused");
        let cfg = IndexConfig {
            document_columns: vec!["Region".to_string()],
            ..config(10)
        };
        agent.ingest_if_empty(&sample_dataset(), &cfg, false).await.unwrap();

        let hits = index.query("asia", 1).await.unwrap();
        assert_eq!(hits, vec!["Region: Asia.".to_string()]);
    }

    #[tokio::test]
    async fn test_answer_uses_retrieved_context() {
        let (agent, client, _index) = setup("Asia leads on volume.");
        agent.ingest_if_empty(&sample_dataset(), &config(10), false).await.unwrap();

        let result = agent.execute("Why is Asia selling well?").await.unwrap();
        let AgentResult::Qualitative(result) = result else {
            panic!("expected qualitative result");
        };
        assert_eq!(result.status, AgentStatus::Ok);
        assert_eq!(result.insight, "Asia leads on volume.");
        assert!(result.context_used.unwrap().contains("Region: Asia"));

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.starts_with("Context:\n"));
        assert!(requests[0].prompt.ends_with("Question: Why is Asia selling well?"));
        assert!(requests[0].system.as_deref().unwrap().contains("Market Researcher"));
    }

    #[tokio::test]
    async fn test_empty_retrieval_skips_completion() {
        let (agent, client, _index) = setup("should not be used");

        let result = agent.execute("Anything about Europe?").await.unwrap();
        assert_eq!(result.status(), AgentStatus::Error);
        assert_eq!(result.error(), Some("empty retrieval"));
        assert_eq!(result.insight(), NO_CONTEXT_INSIGHT);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_completion_failure_is_error_result() {
        let client = Arc::new(ScriptedClient::failing("server down"));
        let index = Arc::new(PersistentIndex::in_memory(client.clone()));
        let agent = QualitativeAgent::new(client, index, 3);
        agent.ingest_if_empty(&sample_dataset(), &config(10), false).await.unwrap();

        let result = agent.execute("europe?").await.unwrap();
        assert_eq!(result.status(), AgentStatus::Error);
        assert!(result.error().unwrap().contains("server down"));
    }
}
