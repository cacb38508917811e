//! Vector index used by the qualitative agent.
//!
//! The index is a keyed document store with similarity search. The
//! pipeline only relies on the [`VectorIndex`] trait; [`PersistentIndex`]
//! is the JSON-file implementation used by the binary.

pub mod store;

pub use store::PersistentIndex;

use anyhow::Result;
use async_trait::async_trait;

/// Persistent keyed document store with top-k similarity query.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Number of stored documents.
    async fn count(&self) -> Result<usize>;

    /// Add documents under the given ids. Both slices have the same length.
    async fn add(&self, documents: Vec<String>, ids: Vec<String>) -> Result<()>;

    /// The `top_k` most similar documents to `text`, best first.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<String>>;

    /// Fingerprint of the dataset the index was built from, if recorded.
    async fn dataset_fingerprint(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Record the fingerprint of the dataset just ingested.
    async fn set_dataset_fingerprint(&self, _fingerprint: &str) -> Result<()> {
        Ok(())
    }

    /// Remove every document.
    async fn clear(&self) -> Result<()> {
        Err(anyhow::anyhow!("this index cannot be cleared"))
    }
}
