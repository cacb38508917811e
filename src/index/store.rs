//! JSON-file vector store.
//!
//! Documents and their embeddings are kept in memory and written back to a
//! single JSON file after every change. Similarity is cosine over the
//! embeddings produced by the completion service.

use super::VectorIndex;
use crate::llm::CompletionClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

/// A stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Stable id derived from the source row position.
    pub id: String,
    /// Denormalized row description.
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    dataset_fingerprint: Option<String>,
    #[serde(default)]
    documents: Vec<IndexDocument>,
}

/// Vector index persisted to a JSON file.
pub struct PersistentIndex {
    /// Backing file; `None` keeps the index in memory only.
    path: Option<PathBuf>,
    embedder: Arc<dyn CompletionClient>,
    state: RwLock<IndexFile>,
}

impl PersistentIndex {
    /// Open the index at `path`, creating an empty one if the file is absent.
    pub fn open(path: &Path, embedder: Arc<dyn CompletionClient>) -> Result<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read index file: {}", path.display()))?;
            let file: IndexFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse index file: {}", path.display()))?;
            if file.version != FORMAT_VERSION {
                return Err(anyhow::anyhow!(
                    "Unsupported index format version {} in {}",
                    file.version,
                    path.display()
                ));
            }
            info!(
                "Loaded {} existing documents from {}",
                file.documents.len(),
                path.display()
            );
            file
        } else {
            debug!("No index at {}, starting empty", path.display());
            IndexFile {
                version: FORMAT_VERSION,
                ..Default::default()
            }
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            embedder,
            state: RwLock::new(state),
        })
    }

    /// Index that is never written to disk.
    #[cfg(test)]
    pub fn in_memory(embedder: Arc<dyn CompletionClient>) -> Self {
        Self {
            path: None,
            embedder,
            state: RwLock::new(IndexFile {
                version: FORMAT_VERSION,
                ..Default::default()
            }),
        }
    }

    fn persist(&self, file: &IndexFile) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create index directory: {}", parent.display())
                })?;
            }
        }

        // Write to a sibling file first so a crash never leaves a truncated index.
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec(file).context("Failed to serialize index")?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write index file: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace index file: {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PersistentIndex {
    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.documents.len())
    }

    async fn add(&self, documents: Vec<String>, ids: Vec<String>) -> Result<()> {
        if documents.len() != ids.len() {
            return Err(anyhow::anyhow!(
                "add called with {} documents and {} ids",
                documents.len(),
                ids.len()
            ));
        }

        let embeddings = self.embedder.embed(&documents).await?;

        let mut state = self.state.write().await;
        let existing: HashSet<String> = state.documents.iter().map(|d| d.id.clone()).collect();

        for ((id, text), embedding) in ids.into_iter().zip(documents).zip(embeddings) {
            if existing.contains(&id) {
                warn!("Document id {} already present, ignoring", id);
                continue;
            }
            state.documents.push(IndexDocument {
                id,
                text,
                embedding,
            });
        }

        self.persist(&state)
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<String>> {
        if top_k == 0 || self.state.read().await.documents.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding service returned no vector for query"))?;

        let state = self.state.read().await;
        let mut scored: Vec<(f32, &IndexDocument)> = state
            .documents
            .iter()
            .map(|doc| (cosine_similarity(&query_embedding, &doc.embedding), doc))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(_, doc)| doc.text.clone()).collect())
    }

    async fn dataset_fingerprint(&self) -> Result<Option<String>> {
        Ok(self.state.read().await.dataset_fingerprint.clone())
    }

    async fn set_dataset_fingerprint(&self, fingerprint: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.dataset_fingerprint = Some(fingerprint.to_string());
        self.persist(&state)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.documents.clear();
        state.dataset_fingerprint = None;
        self.persist(&state)
    }
}

/// Cosine similarity; 0 for mismatched or zero-length vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionRequest;

    /// Embeds text as keyword counts over a tiny fixed vocabulary.
    struct KeywordEmbedder;

    const VOCAB: [&str; 4] = ["europe", "asia", "price", "sales"];

    #[async_trait]
    impl CompletionClient for KeywordEmbedder {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Err(anyhow::anyhow!("not a completion model"))
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
            "keywords"
        }
    }

    fn docs() -> (Vec<String>, Vec<String>) {
        (
            vec![
                "Region: Europe. Price: high".to_string(),
                "Region: Asia. Sales: strong".to_string(),
                "Region: Europe. Europe sales".to_string(),
            ],
            vec!["0".to_string(), "1".to_string(), "2".to_string()],
        )
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = PersistentIndex::in_memory(Arc::new(KeywordEmbedder));
        let (documents, ids) = docs();
        index.add(documents, ids).await.unwrap();

        let hits = index.query("asia", 1).await.unwrap();
        assert_eq!(hits, vec!["Region: Asia. Sales: strong".to_string()]);

        let hits = index.query("europe", 5).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].contains("Europe"));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_ignored() {
        let index = PersistentIndex::in_memory(Arc::new(KeywordEmbedder));
        let (documents, ids) = docs();
        index.add(documents.clone(), ids.clone()).await.unwrap();
        index.add(documents, ids).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");

        {
            let index = PersistentIndex::open(&path, Arc::new(KeywordEmbedder)).unwrap();
            let (documents, ids) = docs();
            index.add(documents, ids).await.unwrap();
            index.set_dataset_fingerprint("abc").await.unwrap();
        }

        let reopened = PersistentIndex::open(&path, Arc::new(KeywordEmbedder)).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 3);
        assert_eq!(
            reopened.dataset_fingerprint().await.unwrap().as_deref(),
            Some("abc")
        );

        reopened.clear().await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 0);
        assert!(reopened.dataset_fingerprint().await.unwrap().is_none());
    }

    #[test]
    fn test_mismatched_ids_are_rejected() {
        let index = PersistentIndex::in_memory(Arc::new(KeywordEmbedder));
        let result = tokio_test::block_on(index.add(vec!["a".to_string()], Vec::new()));
        assert!(result.is_err());
        assert_eq!(tokio_test::block_on(index.count()).unwrap(), 0);
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, r#"{"version": 99, "documents": []}"#).unwrap();
        assert!(PersistentIndex::open(&path, Arc::new(KeywordEmbedder)).is_err());
    }

    #[tokio::test]
    async fn test_empty_index_query_skips_embedding() {
        let index = PersistentIndex::in_memory(Arc::new(KeywordEmbedder));
        assert!(index.query("anything", 5).await.unwrap().is_empty());
    }
}
