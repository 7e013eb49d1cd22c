//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: refuses every call; ingest runs in the `chunk` phase.
//! - **[`HttpProvider`]**: calls the OpenAI `/v1/embeddings` or Ollama `/api/embed` endpoint.
//! - **[`HashingProvider`]**: deterministic feature hashing of character trigrams, fully offline.
//!
//! Providers make exactly one attempt per call and classify failures as
//! [`EmbedError`]. Batching, splitting, retries, and backoff live in the
//! [`gateway`] module.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] compares two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] encode vectors as little-endian f32 BLOBs
//!
//! # Error classification
//!
//! - HTTP 429 and 5xx, timeouts, connection errors → [`EmbedError::Transient`]
//! - other HTTP 4xx → [`EmbedError::Permanent`]
//! - unparseable body, wrong count or dimension → [`EmbedError::Invalid`]

pub mod gateway;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

pub use gateway::{EmbeddingGateway, GatewayStats, PartialEmbedding, RetryPolicy};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    /// Worth retrying: timeout, connection failure, 429, 5xx.
    #[error("transient embedding failure: {0}")]
    Transient(String),
    /// The backend rejected the input; retrying the same input fails again.
    #[error("embedding request rejected: {0}")]
    Permanent(String),
    /// The backend answered but the vectors are unusable.
    #[error("invalid embedding response: {0}")]
    Invalid(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed `texts` in one backend call, returning one vector per text in order.
    async fn embed(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>, EmbedError>;
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String], _is_query: bool) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Permanent(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ HTTP Providers ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpBackend {
    OpenAI,
    Ollama,
}

/// Embedding provider backed by an HTTP embedding service.
///
/// OpenAI requires the `OPENAI_API_KEY` environment variable; Ollama
/// defaults to `http://localhost:11434`.
pub struct HttpProvider {
    backend: HttpBackend,
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(backend: HttpBackend, config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for HTTP providers"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for HTTP providers"))?;

        let (url, api_key) = match backend {
            HttpBackend::OpenAI => {
                let key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
                let base = config
                    .url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com".to_string());
                (format!("{}/v1/embeddings", base.trim_end_matches('/')), Some(key))
            }
            HttpBackend::Ollama => {
                let base = config
                    .url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".to_string());
                (format!("{}/api/embed", base.trim_end_matches('/')), None)
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            backend,
            client,
            model,
            dims,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], _is_query: bool) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| EmbedError::Transient(format!("{} request failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let msg = format!("API error {}: {}", status, body_text);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(EmbedError::Transient(msg))
            } else {
                Err(EmbedError::Permanent(msg))
            };
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::Transient(format!("reading response body: {}", e)))?;

        match self.backend {
            HttpBackend::OpenAI => parse_openai_response(&json),
            HttpBackend::Ollama => parse_ollama_response(&json),
        }
    }
}

fn json_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| EmbedError::Invalid("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Invalid("non-numeric embedding value".to_string()))
        })
        .collect()
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Invalid("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbedError::Invalid("missing embedding".to_string()))?;
        indexed.push((index, json_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Invalid("missing embeddings array".to_string()))?
        .iter()
        .map(json_vector)
        .collect()
}

// ============ Hashing Provider ============

/// Offline provider: each lowercase character trigram is hashed into one of
/// `dims` signed buckets, then the vector is L2-normalised. Texts sharing
/// many trigrams land close together, which is enough for duplicate
/// detection and tests.
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return v;
        }
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for gram in chars.windows(3) {
            let s: String = gram.iter().collect();
            let digest = Sha256::digest(s.as_bytes());
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(word);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing-trigram"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String], _is_query: bool) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Create an embedding provider from configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`HttpProvider`] (OpenAI) |
/// | `"ollama"` | [`HttpProvider`] (Ollama) |
/// | `"hashing"` | [`HashingProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(HttpProvider::new(HttpBackend::OpenAI, config)?)),
        "ollama" => Ok(Arc::new(HttpProvider::new(HttpBackend::Ollama, config)?)),
        "hashing" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hashing provider"))?;
            Ok(Arc::new(HashingProvider::new(dims)))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
