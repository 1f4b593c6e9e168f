//! Vector backends and the once-per-process backend selection.

pub mod local;
pub mod pinecone;

pub use local::{LocalStore, LOCAL_BACKEND};
pub use pinecone::{PineconeStore, PINECONE_BACKEND};

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{CredentialState, StoreConfig};
use crate::embeddings::{CharacterNgramEmbedder, PineconeEmbedder};
use crate::error::SearchError;
use crate::traits::VectorIndex;

/// Picks the remote index when its credentials work, otherwise the local one.
///
/// An unreachable or unusable remote downgrades to the local backend. A
/// remote index that disagrees with the embedder (dimensions or metric) is a
/// configuration error and is returned, as are errors opening the local
/// backend.
pub async fn open_vector_index(config: &StoreConfig) -> Result<Arc<dyn VectorIndex>, SearchError> {
    if let Some(remote) = &config.remote {
        match &remote.api_key {
            CredentialState::Missing => {
                info!("no pinecone api key configured, using local vector index");
            }
            CredentialState::Placeholder => {
                warn!("pinecone api key is a placeholder, using local vector index");
            }
            CredentialState::Present(key) => {
                let embedder =
                    PineconeEmbedder::new(key.clone()).with_endpoint(remote.control_endpoint.clone());
                match PineconeStore::connect(remote, embedder).await {
                    Ok(store) => {
                        info!(backend = PINECONE_BACKEND, "vector backend selected");
                        return Ok(Arc::new(store));
                    }
                    Err(error) if error.is_configuration() => return Err(error),
                    Err(error) => {
                        warn!(error = %error, "pinecone initialization failed, falling back to local index");
                    }
                }
            }
        }
    }

    let store = LocalStore::open(&config.local, CharacterNgramEmbedder::default()).await?;
    info!(backend = LOCAL_BACKEND, "vector backend selected");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalStoreConfig, RemoteStoreConfig};
    use crate::test_server::TestServer;
    use serde_json::json;
    use tempfile::tempdir;

    fn remote_at(url: &str, dir: &std::path::Path) -> StoreConfig {
        let mut remote = RemoteStoreConfig::new(CredentialState::Present("pc-test".to_string()));
        remote.control_endpoint = url.to_string();
        StoreConfig {
            local: LocalStoreConfig {
                persist_directory: dir.to_path_buf(),
                collection: "documents".to_string(),
            },
            remote: Some(remote),
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn placeholder_key_falls_back_to_local() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = StoreConfig {
            local: LocalStoreConfig {
                persist_directory: dir.path().to_path_buf(),
                collection: "documents".to_string(),
            },
            remote: Some(RemoteStoreConfig::new(CredentialState::from_env_value(Some(
                "your_pinecone_api_key_here",
            )))),
            ..StoreConfig::default()
        };

        let index = open_vector_index(&config).await?;
        assert_eq!(index.stats().await?.backend, LOCAL_BACKEND);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_to_local() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut remote = RemoteStoreConfig::new(CredentialState::Present("pc-test".to_string()));
        remote.control_endpoint = "http://127.0.0.1:9".to_string();

        let config = StoreConfig {
            local: LocalStoreConfig {
                persist_directory: dir.path().to_path_buf(),
                collection: "documents".to_string(),
            },
            remote: Some(remote),
            ..StoreConfig::default()
        };

        let index = open_vector_index(&config).await?;
        let stats = index.stats().await?;
        assert_eq!(stats.backend, LOCAL_BACKEND);
        assert_eq!(stats.dimensions, 384);
        Ok(())
    }

    #[tokio::test]
    async fn remote_dimension_mismatch_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::start(|_, _| {
            (
                200,
                json!({"name": "resume-index", "dimension": 384, "metric": "cosine", "host": "127.0.0.1:1"}),
            )
        })
        .await;
        let dir = tempdir()?;

        let result = open_vector_index(&remote_at(&server.url, dir.path())).await;
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch {
                expected: 384,
                actual: 1024
            })
        ));
        assert!(!dir.path().join("documents.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn remote_with_wrong_metric_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::start(|_, _| {
            (
                200,
                json!({"name": "resume-index", "dimension": 1024, "metric": "euclidean", "host": "127.0.0.1:1"}),
            )
        })
        .await;
        let dir = tempdir()?;

        let result = open_vector_index(&remote_at(&server.url, dir.path())).await;
        assert!(matches!(result, Err(SearchError::Configuration(_))));
        Ok(())
    }

    #[tokio::test]
    async fn remote_server_errors_fall_back_to_local() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::start(|_, _| (503, json!({"error": "unavailable"}))).await;
        let dir = tempdir()?;

        let index = open_vector_index(&remote_at(&server.url, dir.path())).await?;
        assert_eq!(index.stats().await?.backend, LOCAL_BACKEND);
        Ok(())
    }
}
