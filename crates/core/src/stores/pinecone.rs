//! Pinecone-backed remote index.
//!
//! Pinecone reports cosine similarity; results are normalized into the
//! shared distance/score pair before they leave this module.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RemoteStoreConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::SearchError;
use crate::models::{IndexStats, Metadata, MetadataFilter, SearchResult};
use crate::traits::{check_batch_shape, VectorIndex};

pub const PINECONE_BACKEND: &str = "pinecone";

const API_VERSION: &str = "2024-07";
const TEXT_KEY: &str = "text";
const UPSERT_BATCH: usize = 96;
const DELETE_BATCH: usize = 1_000;
const ID_PAGE: usize = 10_000;

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    #[serde(default)]
    host: String,
    #[serde(default)]
    metric: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStatsResponse {
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

pub struct PineconeStore<E> {
    client: Client,
    api_key: String,
    host: String,
    index_name: String,
    namespace: Option<String>,
    embedder: E,
}

impl<E: EmbeddingProvider> PineconeStore<E> {
    /// Resolves the index host, creating the index when it does not exist yet.
    pub async fn connect(config: &RemoteStoreConfig, embedder: E) -> Result<Self, SearchError> {
        let api_key = config
            .api_key
            .usable()
            .ok_or_else(|| SearchError::BackendUnavailable {
                backend: PINECONE_BACKEND.to_string(),
                details: "api key is missing or a placeholder".to_string(),
            })?
            .to_string();

        let client = Client::new();
        let control = config.control_endpoint.trim_end_matches('/');
        let description = describe_or_create(&client, &api_key, control, config, &embedder).await?;

        if description.dimension != embedder.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: description.dimension,
                actual: embedder.dimensions(),
            });
        }
        if let Some(metric) = description.metric.as_deref() {
            if metric != "cosine" {
                return Err(SearchError::Configuration(format!(
                    "index `{}` uses metric `{metric}`, expected cosine",
                    config.index_name
                )));
            }
        }
        if description.host.is_empty() {
            return Err(SearchError::BackendUnavailable {
                backend: PINECONE_BACKEND.to_string(),
                details: format!("index `{}` has no host yet", config.index_name),
            });
        }

        info!(
            index = %config.index_name,
            namespace = ?config.namespace,
            dimensions = description.dimension,
            "pinecone index ready"
        );

        Ok(Self {
            client,
            api_key,
            host: data_plane_url(&description.host),
            index_name: config.index_name.clone(),
            namespace: config.namespace.clone(),
            embedder,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        authorized(self.client.post(format!("{}{path}", self.host)), &self.api_key)
    }

    async fn send(&self, path: &str, body: Value) -> Result<Value, SearchError> {
        let response = self.post(path).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: PINECONE_BACKEND.to_string(),
                details: format!("{path} returned {status}: {details}"),
            });
        }
        Ok(response.json().await?)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<(), SearchError> {
        for batch in ids.chunks(DELETE_BATCH) {
            self.send(
                "/vectors/delete",
                with_namespace(json!({ "ids": batch }), self.namespace.as_deref()),
            )
            .await?;
        }
        Ok(())
    }

    /// Ids of records matching `filter`, found through a filtered query.
    async fn matching_ids(&self, filter: &Value) -> Result<Vec<String>, SearchError> {
        let mut probe = vec![0f32; self.embedder.dimensions()];
        if let Some(first) = probe.first_mut() {
            *first = 1.0;
        }

        let body = with_namespace(
            json!({
                "vector": probe,
                "topK": ID_PAGE,
                "filter": filter,
                "includeMetadata": false,
                "includeValues": false,
            }),
            self.namespace.as_deref(),
        );
        let parsed: QueryResponse = serde_json::from_value(self.send("/query", body).await?)?;
        Ok(parsed.matches.into_iter().map(|hit| hit.id).collect())
    }
}

#[async_trait]
impl<E: EmbeddingProvider> VectorIndex for PineconeStore<E> {
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
        let vectors = texts
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
                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "values": embedding,
                    "metadata": to_pinecone_metadata(text, metadata),
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let mut committed: Vec<String> = Vec::new();
        for batch in vectors.chunks(UPSERT_BATCH) {
            let body = with_namespace(json!({ "vectors": batch }), self.namespace.as_deref());
            if let Err(error) = self.send("/vectors/upsert", body).await {
                if !committed.is_empty() {
                    warn!(
                        rolled_back = committed.len(),
                        error = %error,
                        "upsert batch failed, removing earlier batches"
                    );
                    if let Err(rollback) = self.delete_ids(&committed).await {
                        warn!(error = %rollback, "rollback of partial upsert failed");
                    }
                }
                return Err(error);
            }
            committed.extend(
                batch
                    .iter()
                    .filter_map(|vector| vector.get("id").and_then(Value::as_str))
                    .map(str::to_string),
            );
        }

        debug!(added = committed.len(), index = %self.index_name, "pinecone upsert committed");
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query).await?;
        if vector.len() != self.embedder.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: vector.len(),
            });
        }

        let body = with_namespace(
            json!({
                "vector": vector,
                "topK": k,
                "includeMetadata": true,
                "includeValues": false,
            }),
            self.namespace.as_deref(),
        );
        let parsed: QueryResponse = serde_json::from_value(self.send("/query", body).await?)?;
        Ok(into_results(parsed, k))
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<u64, SearchError> {
        let pinecone_filter = to_pinecone_filter(filter);
        let mut seen = HashSet::new();
        let mut deleted = 0u64;

        loop {
            let page = self.matching_ids(&pinecone_filter).await?;
            let fresh = page
                .iter()
                .filter(|id| seen.insert((*id).clone()))
                .cloned()
                .collect::<Vec<_>>();
            if fresh.is_empty() {
                break;
            }

            self.delete_ids(&fresh).await?;
            deleted += fresh.len() as u64;

            if page.len() < ID_PAGE {
                break;
            }
        }

        Ok(deleted)
    }

    async fn stats(&self) -> Result<IndexStats, SearchError> {
        let parsed: IndexStatsResponse =
            serde_json::from_value(self.send("/describe_index_stats", json!({})).await?)?;
        let total_count = match self.namespace.as_deref() {
            Some(namespace) => parsed
                .namespaces
                .get(namespace)
                .map(|summary| summary.vector_count)
                .unwrap_or(0),
            None => parsed.total_vector_count,
        };

        Ok(IndexStats {
            backend: PINECONE_BACKEND.to_string(),
            total_count,
            dimensions: self.embedder.dimensions(),
            model: self.embedder.model_id().to_string(),
        })
    }
}

async fn describe_or_create<E: EmbeddingProvider>(
    client: &Client,
    api_key: &str,
    control: &str,
    config: &RemoteStoreConfig,
    embedder: &E,
) -> Result<IndexDescription, SearchError> {
    let describe = authorized(
        client.get(format!("{control}/indexes/{}", config.index_name)),
        api_key,
    )
    .send()
    .await
    .map_err(unavailable)?;

    if describe.status().is_success() {
        return Ok(describe.json().await.map_err(unavailable)?);
    }

    if describe.status() != StatusCode::NOT_FOUND {
        return Err(SearchError::BackendUnavailable {
            backend: PINECONE_BACKEND.to_string(),
            details: format!("describe index returned {}", describe.status()),
        });
    }

    warn!(index = %config.index_name, "pinecone index not found, creating it");
    let created = authorized(client.post(format!("{control}/indexes")), api_key)
        .json(&json!({
            "name": config.index_name,
            "dimension": embedder.dimensions(),
            "metric": "cosine",
            "spec": {
                "serverless": {
                    "cloud": config.cloud,
                    "region": config.region,
                }
            }
        }))
        .send()
        .await
        .map_err(unavailable)?;

    if !created.status().is_success() {
        return Err(SearchError::BackendUnavailable {
            backend: PINECONE_BACKEND.to_string(),
            details: format!("create index returned {}", created.status()),
        });
    }

    created.json().await.map_err(unavailable)
}

fn authorized(request: RequestBuilder, api_key: &str) -> RequestBuilder {
    request
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
}

fn unavailable(error: reqwest::Error) -> SearchError {
    SearchError::BackendUnavailable {
        backend: PINECONE_BACKEND.to_string(),
        details: error.to_string(),
    }
}

fn data_plane_url(host: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn with_namespace(mut body: Value, namespace: Option<&str>) -> Value {
    if let (Some(namespace), Some(object)) = (namespace, body.as_object_mut()) {
        object.insert("namespace".to_string(), json!(namespace));
    }
    body
}

/// Pinecone metadata accepts strings, numbers, booleans and lists of strings.
fn to_pinecone_metadata(text: &str, metadata: &Metadata) -> Value {
    let mut converted = Map::new();
    for (key, value) in metadata {
        let accepted = match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            Value::Null | Value::Object(_) => false,
        };
        if accepted {
            converted.insert(key.clone(), value.clone());
        } else {
            debug!(key = %key, "dropping metadata value pinecone cannot store");
        }
    }
    converted.insert(TEXT_KEY.to_string(), json!(text));
    Value::Object(converted)
}

fn to_pinecone_filter(filter: &MetadataFilter) -> Value {
    let clauses = filter
        .clauses()
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
        .collect::<Map<_, _>>();
    Value::Object(clauses)
}

fn into_results(response: QueryResponse, k: usize) -> Vec<SearchResult> {
    let mut results = response
        .matches
        .into_iter()
        .map(|hit| {
            let mut metadata = hit.metadata.unwrap_or_default();
            let text = match metadata.remove(TEXT_KEY) {
                Some(Value::String(text)) => text,
                _ => String::new(),
            };
            SearchResult::from_similarity(hit.id, text, metadata, hit.score)
        })
        .collect::<Vec<_>>();

    results.sort_by(|left, right| left.distance.total_cmp(&right.distance));
    results.truncate(k);
    results
}
