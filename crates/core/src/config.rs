use std::path::PathBuf;

use crate::chunking::ChunkingConfig;

pub const DEFAULT_PERSIST_DIRECTORY: &str = "./data/chroma_db";
pub const DEFAULT_COLLECTION_NAME: &str = "rag_documents";
pub const DEFAULT_REMOTE_INDEX_NAME: &str = "resume-index";

/// Values shipped in sample `.env` files that must be treated as unset.
const PLACEHOLDER_CREDENTIALS: [&str; 4] = [
    "your_pinecone_api_key_here",
    "your_openai_api_key_here",
    "your_api_key_here",
    "changeme",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    Missing,
    Placeholder,
    Present(String),
}

impl CredentialState {
    pub fn from_env_value(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return CredentialState::Missing;
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CredentialState::Missing;
        }

        let lowered = trimmed.to_ascii_lowercase();
        let looks_templated = lowered.starts_with("your_") && lowered.ends_with("_here");
        if looks_templated || PLACEHOLDER_CREDENTIALS.contains(&lowered.as_str()) {
            return CredentialState::Placeholder;
        }

        CredentialState::Present(trimmed.to_string())
    }

    pub fn usable(&self) -> Option<&str> {
        match self {
            CredentialState::Present(key) => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    pub persist_directory: PathBuf,
    pub collection: String,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            persist_directory: PathBuf::from(DEFAULT_PERSIST_DIRECTORY),
            collection: DEFAULT_COLLECTION_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub api_key: CredentialState,
    pub index_name: String,
    pub namespace: Option<String>,
    pub control_endpoint: String,
    pub cloud: String,
    pub region: String,
}

impl RemoteStoreConfig {
    pub fn new(api_key: CredentialState) -> Self {
        Self {
            api_key,
            index_name: DEFAULT_REMOTE_INDEX_NAME.to_string(),
            namespace: None,
            control_endpoint: "https://api.pinecone.io".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub local: LocalStoreConfig,
    pub remote: Option<RemoteStoreConfig>,
    pub chunking: ChunkingConfig,
}
