use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Matches the 384-dimensional sentence embeddings used by the local index.
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 384;
pub const LOCAL_EMBEDDING_MODEL: &str = "char-trigram-hash";

pub const REMOTE_EMBEDDING_MODEL: &str = "multilingual-e5-large";
pub const REMOTE_EMBEDDING_DIMENSIONS: usize = 1024;
pub const EMBED_BATCH: usize = 96;

const PINECONE_API_VERSION: &str = "2024-10";

/// Turns text into unit-length vectors of a fixed dimensionality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError>;
}

/// Scales `vector` to unit length in place; zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Hashes lowercase character trigrams into buckets. Runs fully offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: LOCAL_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed(text))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    parameters: EmbedParameters<'a>,
    inputs: Vec<EmbedInput<'a>>,
}

#[derive(Serialize)]
struct EmbedParameters<'a> {
    input_type: &'a str,
    truncate: &'a str,
}

#[derive(Serialize)]
struct EmbedInput<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedValues>,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

/// Server-side embeddings from Pinecone's hosted inference endpoint.
pub struct PineconeEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl PineconeEmbedder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: "https://api.pinecone.io".to_string(),
            api_key: api_key.into(),
            model: REMOTE_EMBEDDING_MODEL.to_string(),
            dimensions: REMOTE_EMBEDDING_DIMENSIONS,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The hosted endpoint accepts at most [`EMBED_BATCH`] inputs per call.
    async fn embed(&self, texts: &[&str], input_type: &str) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            embeddings.extend(self.embed_batch(batch, input_type).await?);
        }
        Ok(embeddings)
    }

    async fn embed_batch(
        &self,
        texts: &[&str],
        input_type: &str,
    ) -> Result<Vec<Vec<f32>>, SearchError> {
        let request = EmbedRequest {
            model: &self.model,
            parameters: EmbedParameters {
                input_type,
                truncate: "END",
            },
            inputs: texts.iter().map(|text| EmbedInput { text: *text }).collect(),
        };

        let response = self
            .client
            .post(format!("{}/embed", self.endpoint.trim_end_matches('/')))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "pinecone-inference".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(SearchError::BackendResponse {
                backend: "pinecone-inference".to_string(),
                details: format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        parsed
            .data
            .into_iter()
            .map(|item| {
                if item.values.len() != self.dimensions {
                    return Err(SearchError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: item.values.len(),
                    });
                }
                let mut values = item.values;
                normalize(&mut values);
                Ok(values)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for PineconeEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let borrowed = texts.iter().map(String::as_str).collect::<Vec<_>>();
        self.embed(&borrowed, "passage").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed(&[text], "query")
            .await?
            .pop()
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "pinecone-inference".to_string(),
                details: "empty embedding response".to_string(),
            })
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let norm_left: f32 = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let norm_right: f32 = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }

    f64::from(dot / (norm_left * norm_right))
}
