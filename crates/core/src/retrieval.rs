use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::chunking::{build_chunks, ChunkingConfig};
use crate::error::{IngestError, SearchError};
use crate::extractor::{extract_document, PageText};
use crate::identity::sanitize_identifier;
use crate::models::{keys, IndexStats, IngestReport, Metadata, MetadataFilter, SearchResult};
use crate::traits::VectorIndex;

pub const SCREENING_TOP_K: usize = 10;

/// Chunk-then-store ingestion and k-nearest-neighbour queries over one index.
pub struct RetrievalService<V: ?Sized> {
    index: Arc<V>,
    chunking: ChunkingConfig,
}

impl<V: VectorIndex + ?Sized> RetrievalService<V> {
    pub fn new(index: Arc<V>, chunking: ChunkingConfig) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self { index, chunking })
    }

    pub fn index(&self) -> &Arc<V> {
        &self.index
    }

    pub async fn ingest(&self, raw_text: &str, source_name: &str) -> Result<IngestReport, IngestError> {
        let pages = [PageText {
            number: None,
            text: raw_text.to_string(),
        }];
        self.ingest_pages(&pages, source_name, Metadata::new()).await
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, IngestError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let pages = extract_document(path)?;
        self.ingest_pages(&pages, name, Metadata::new()).await
    }

    /// Chunks `pages` as one document. `extra` is passed through, but can't
    /// override the canonical keys written here.
    pub async fn ingest_pages(
        &self,
        pages: &[PageText],
        source_name: &str,
        extra: Metadata,
    ) -> Result<IngestReport, IngestError> {
        let source = sanitize_identifier(source_name).ok_or_else(|| {
            IngestError::InvalidArgument(format!("unusable source name {source_name:?}"))
        })?;

        let borrowed = pages
            .iter()
            .map(|page| (page.number, page.text.as_str()))
            .collect::<Vec<_>>();
        let chunks = build_chunks(&source, &borrowed, self.chunking)?;

        let document_id = Uuid::new_v4().to_string();
        if chunks.is_empty() {
            return Ok(IngestReport {
                document_id,
                source,
                chunks_created: 0,
            });
        }

        let checksum = checksum(pages);
        let ingested_at = Utc::now().to_rfc3339();
        let file_type = Path::new(&source)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()));

        let mut texts = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut metadata = extra.clone();
            metadata.insert(keys::DOCUMENT_ID.into(), json!(document_id));
            metadata.insert(keys::SOURCE.into(), json!(source));
            metadata.insert(keys::FILENAME.into(), json!(source));
            metadata.insert(keys::CHUNK_INDEX.into(), json!(chunk.chunk_index));
            metadata.insert(keys::TOTAL_CHUNKS.into(), json!(chunk.total_chunks));
            metadata.insert(keys::CHECKSUM.into(), json!(checksum));
            metadata.insert(keys::INGESTED_AT.into(), json!(ingested_at));
            match chunk.page {
                Some(page) => metadata.insert(keys::PAGE.into(), json!(page)),
                None => metadata.remove(keys::PAGE),
            };
            match &file_type {
                Some(file_type) => metadata.insert(keys::FILE_TYPE.into(), json!(file_type)),
                None => metadata.remove(keys::FILE_TYPE),
            };
            texts.push(chunk.text);
            metadatas.push(metadata);
        }

        self.index.add_documents(&texts, &metadatas).await?;
        info!(source = %source, document_id = %document_id, chunks = texts.len(), "document ingested");

        Ok(IngestReport {
            document_id,
            source,
            chunks_created: texts.len(),
        })
    }

    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchResult>, SearchError> {
        if text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        let mut results = self.index.search(text, k).await?;
        results.truncate(k);
        Ok(results)
    }

    /// Zero when nothing carries `document_id`.
    pub async fn delete_document(&self, document_id: &str) -> Result<u64, SearchError> {
        let deleted = self
            .index
            .delete_by_filter(&MetadataFilter::equals(keys::DOCUMENT_ID, document_id))
            .await?;
        info!(document_id = %document_id, deleted, "document deleted");
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<IndexStats, SearchError> {
        self.index.stats().await
    }

    /// Top chunks for a job description laid out as a comparison prompt.
    pub async fn screening_context(
        &self,
        job_description: &str,
        k: usize,
    ) -> Result<Option<String>, SearchError> {
        let results = self.query(job_description, k).await?;
        if results.is_empty() {
            return Ok(None);
        }

        let parts = results
            .iter()
            .enumerate()
            .map(|(position, result)| {
                let page = result
                    .page()
                    .map(|page| page.to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                format!("[Part {} - Page {page}]:\n{}", position + 1, result.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(Some(format!(
            "CONTEXT: Here are the relevant parts of the candidate's resume:\n\n{parts}\n\n\
             TASK: Compare the resume parts above against this Job Description:\n\n{job_description}"
        )))
    }
}

fn checksum(pages: &[PageText]) -> String {
    let mut hasher = Sha256::new();
    for page in pages {
        hasher.update(page.text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
