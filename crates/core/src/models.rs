use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SearchError;

/// Opaque per-record metadata. Canonical keys are listed in [`keys`].
pub type Metadata = Map<String, Value>;

pub mod keys {
    pub const SOURCE: &str = "source";
    pub const FILENAME: &str = "filename";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const PAGE: &str = "page";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TOTAL_CHUNKS: &str = "total_chunks";
    pub const FILE_TYPE: &str = "file_type";
    pub const CHECKSUM: &str = "checksum";
    pub const INGESTED_AT: &str = "ingested_at";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_document: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub distance: f64,
    pub score: f64,
}

impl SearchResult {
    /// For backends that report cosine distance.
    pub fn from_distance(id: String, text: String, metadata: Metadata, distance: f64) -> Self {
        Self {
            id,
            text,
            metadata,
            distance,
            score: 1.0 - distance,
        }
    }

    /// For backends that report cosine similarity.
    pub fn from_similarity(id: String, text: String, metadata: Metadata, similarity: f64) -> Self {
        let distance = 1.0 - similarity;
        Self {
            id,
            text,
            metadata,
            distance,
            score: 1.0 - distance,
        }
    }

    pub fn page(&self) -> Option<u64> {
        self.metadata.get(keys::PAGE).and_then(Value::as_u64)
    }
}

/// Equality filter over scalar metadata values, all clauses must match.
///
/// Only non-empty maps of scalar values are accepted: an empty filter would
/// match every record, and nested values have no agreed meaning across
/// backends.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    clauses: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            clauses: vec![(key.into(), value.into())],
        }
    }

    pub fn from_map(map: &Metadata) -> Result<Self, SearchError> {
        if map.is_empty() {
            return Err(SearchError::Configuration(
                "delete filter must name at least one metadata key".to_string(),
            ));
        }

        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    clauses.push((key.clone(), value.clone()));
                }
                other => {
                    return Err(SearchError::Configuration(format!(
                        "unsupported filter value for `{key}`: {other}"
                    )));
                }
            }
        }

        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.clauses
            .iter()
            .all(|(key, expected)| metadata.get(key).is_some_and(|value| value == expected))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub backend: String,
    pub total_count: u64,
    pub dimensions: usize,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    pub document_id: String,
    pub source: String,
    pub chunks_created: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankingSource {
    Ai,
    Similarity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub rank: usize,
    pub filename: String,
    pub name: String,
    /// 0-100 relevance; model-assigned on the AI path, scaled similarity otherwise.
    pub score: f64,
    pub reasoning: String,
    pub download_url: String,
    pub similarity: f64,
    pub distance: f64,
    pub excerpt: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResponse {
    pub query: String,
    pub count: usize,
    pub ranked_by: RankingSource,
    pub candidates: Vec<RankedCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
