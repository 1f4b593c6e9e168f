use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{backend} is unavailable: {details}")]
    BackendUnavailable { backend: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

impl SearchError {
    /// Configuration failures are fatal and must never be retried or masked.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SearchError::Configuration(_) | SearchError::DimensionMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion endpoint returned {status}: {details}")]
    Status { status: u16, details: String },

    #[error("completion response had no content")]
    EmptyResponse,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::SearchError;

    #[test]
    fn dimension_mismatch_is_a_configuration_error() {
        let error = SearchError::DimensionMismatch {
            expected: 384,
            actual: 1024,
        };
        assert!(error.is_configuration());
        assert!(error.to_string().contains("384"));

        let unavailable = SearchError::BackendUnavailable {
            backend: "pinecone".to_string(),
            details: "timeout".to_string(),
        };
        assert!(!unavailable.is_configuration());
    }
}
