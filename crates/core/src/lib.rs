pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod identity;
pub mod llm;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod test_server;

pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use config::{CredentialState, LocalStoreConfig, RemoteStoreConfig, StoreConfig};
pub use embeddings::{CharacterNgramEmbedder, EmbeddingProvider, PineconeEmbedder};
pub use error::{CompletionError, IngestError, SearchError};
pub use extractor::{discover_documents, extract_document, PageText};
pub use identity::{display_identifier, display_name, download_url, sanitize_identifier};
pub use llm::OpenAiCompatibleClient;
pub use models::{
    IndexStats, IngestReport, Metadata, MetadataFilter, RankedCandidate, RankingSource,
    RerankResponse, SearchResult,
};
pub use rerank::{FallbackReason, ModelAccess, RerankOptions, RerankPipeline};
pub use retrieval::{RetrievalService, SCREENING_TOP_K};
pub use stores::{open_vector_index, LocalStore, PineconeStore};
pub use traits::{CompletionClient, VectorIndex};
