//! Persistent single-directory vector index.
//!
//! Every collection is one JSON document under the persist directory. Writes
//! go to a sibling temp file that is renamed over the original, so a failed
//! batch leaves the previous state on disk and in memory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LocalStoreConfig;
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::SearchError;
use crate::models::{IndexStats, Metadata, MetadataFilter, SearchResult, VectorRecord};
use crate::traits::{check_batch_shape, VectorIndex};

pub const LOCAL_BACKEND: &str = "local";

#[derive(Serialize, Deserialize)]
struct CollectionFile {
    collection: String,
    model: String,
    dimensions: usize,
    records: Vec<VectorRecord>,
}

/// Brute-force cosine index held fully in memory.
///
/// Every write clones the record list and rewrites the whole collection file,
/// so a write costs O(N) in the collection size and search is a linear scan.
pub struct LocalStore<E> {
    path: PathBuf,
    collection: String,
    embedder: E,
    records: RwLock<Vec<VectorRecord>>,
}

impl<E: EmbeddingProvider> LocalStore<E> {
    pub async fn open(config: &LocalStoreConfig, embedder: E) -> Result<Self, SearchError> {
        validate_collection_name(&config.collection)?;
        tokio::fs::create_dir_all(&config.persist_directory).await?;
        let path = config
            .persist_directory
            .join(format!("{}.json", config.collection));

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: CollectionFile = serde_json::from_slice(&bytes)?;
                if !file.records.is_empty() {
                    if file.dimensions != embedder.dimensions() {
                        return Err(SearchError::DimensionMismatch {
                            expected: file.dimensions,
                            actual: embedder.dimensions(),
                        });
                    }
                    if file.model != embedder.model_id() {
                        return Err(SearchError::Configuration(format!(
                            "collection `{}` was built with `{}`, not `{}`",
                            file.collection,
                            file.model,
                            embedder.model_id()
                        )));
                    }
                }
                file.records
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        info!(
            path = %path.display(),
            records = records.len(),
            model = embedder.model_id(),
            "local vector index opened"
        );

        Ok(Self {
            path,
            collection: config.collection.clone(),
            embedder,
            records: RwLock::new(records),
        })
    }

    async fn persist(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        let file = CollectionFileRef {
            collection: &self.collection,
            model: self.embedder.model_id(),
            dimensions: self.embedder.dimensions(),
            records,
        };
        let bytes = serde_json::to_vec(&file)?;
        let staging = staging_path(&self.path);
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct CollectionFileRef<'a> {
    collection: &'a str,
    model: &'a str,
    dimensions: usize,
    records: &'a [VectorRecord],
}

#[async_trait]
impl<E: EmbeddingProvider> VectorIndex for LocalStore<E> {
    async fn add_documents(
        &self,
        texts: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), SearchError> {
        check_batch_shape(texts, metadatas)?;
        if texts.is_empty() {
            return Ok(());
        }

        let embeddings = self.embedder.embed_documents(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match text count {}",
                embeddings.len(),
                texts.len()
            )));
        }

        let batch = texts
            .iter()
            .zip(metadatas)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| {
                if embedding.len() != self.embedder.dimensions() {
                    return Err(SearchError::DimensionMismatch {
                        expected: self.embedder.dimensions(),
                        actual: embedding.len(),
                    });
                }
                Ok(VectorRecord {
                    id: Uuid::new_v4().to_string(),
                    text: text.clone(),
                    embedding,
                    metadata: metadata.clone(),
                })
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let mut records = self.records.write().await;
        let mut next = records.clone();
        next.extend(batch);
        self.persist(&next).await?;
        *records = next;

        debug!(added = texts.len(), total = records.len(), "local batch committed");
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;
        if query_vector.len() != self.embedder.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: query_vector.len(),
            });
        }

        let records = self.records.read().await;
        let mut scored = records
            .iter()
            .map(|record| {
                let distance = 1.0 - cosine_similarity(&query_vector, &record.embedding);
                (distance, record)
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| left.0.total_cmp(&right.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, record)| {
                SearchResult::from_distance(
                    record.id.clone(),
                    record.text.clone(),
                    record.metadata.clone(),
                    distance,
                )
            })
            .collect())
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<u64, SearchError> {
        let mut records = self.records.write().await;
        let (removed, kept): (Vec<_>, Vec<_>) = records
            .iter()
            .cloned()
            .partition(|record| filter.matches(&record.metadata));

        if removed.is_empty() {
            return Ok(0);
        }

        self.persist(&kept).await?;
        *records = kept;
        Ok(removed.len() as u64)
    }

    async fn stats(&self) -> Result<IndexStats, SearchError> {
        let records = self.records.read().await;
        Ok(IndexStats {
            backend: LOCAL_BACKEND.to_string(),
            total_count: records.len() as u64,
            dimensions: self.embedder.dimensions(),
            model: self.embedder.model_id().to_string(),
        })
    }
}

fn validate_collection_name(name: &str) -> Result<(), SearchError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SearchError::Configuration(format!(
            "collection name `{name}` may only contain letters, digits, `-` and `_`"
        )))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}
