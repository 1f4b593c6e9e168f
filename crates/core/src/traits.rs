use async_trait::async_trait;

use crate::error::{CompletionError, SearchError};
use crate::models::{IndexStats, Metadata, MetadataFilter, SearchResult};

/// One contract for every vector backend, selected once at startup.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Stores every text with a fresh id. Either the whole batch lands or the
    /// call fails.
    async fn add_documents(
        &self,
        texts: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), SearchError>;

    /// At most `k` results ordered by increasing distance; empty when nothing matches.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, SearchError>;

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<u64, SearchError>;

    async fn stats(&self) -> Result<IndexStats, SearchError>;
}

/// Generative model returning raw text for a system and user prompt.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, CompletionError>;
}

pub(crate) fn check_batch_shape(texts: &[String], metadatas: &[Metadata]) -> Result<(), SearchError> {
    if texts.len() != metadatas.len() {
        return Err(SearchError::Request(format!(
            "metadata count {} doesn't match text count {}",
            metadatas.len(),
            texts.len()
        )));
    }
    Ok(())
}
