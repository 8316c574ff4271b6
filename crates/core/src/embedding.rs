//! Text embeddings for similarity search.
//!
//! Vectors from different models live in different spaces: a collection
//! indexed with one [`Embedder`] must be queried with an embedder reporting
//! the same [`Embedder::model_id`]. The content store records the model id
//! of every collection and refuses to open it with any other.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::provider::{Provider, ProviderError};

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embeddings endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid embeddings response: {0}")]
    InvalidResponse(String),
}

pub type EmbedResult<T> = Result<T, EmbedError>;

/// Converts text into fixed-dimensional vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>>;

    /// Model name and version. Two embedders with the same id must produce
    /// comparable vectors.
    fn model_id(&self) -> &str;
}

/// Compute cosine similarity between two embedding vectors
///
/// Returns a value in [-1, 1] where 1 means identical direction. Vectors of
/// different length are unrelated and score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Offline embedder: hashed word unigrams plus character trigrams,
/// L2-normalized. Deterministic across processes and platforms.
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 384;

    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-v1-{dimensions}"),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimensions as u64) as usize
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&format!("w:{word}"))] += 1.0;

            let chars: Vec<char> = format!(" {word} ").chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                vector[self.bucket(&format!("c:{trigram}"))] += 0.5;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct ApiEmbedder {
    api_url: &'static str,
    model: &'static str,
    model_id: String,
    api_key: String,
    http: reqwest::Client,
}

impl ApiEmbedder {
    pub fn new(provider: Provider, timeout: Duration) -> Result<Self, ProviderError> {
        let config = provider
            .embedding_config()
            .ok_or_else(|| ProviderError::NoEmbeddings {
                provider_name: provider.name().to_string(),
            })?;
        let api_key = provider.validate_api_key()?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: config.api_url,
            model: config.model,
            model_id: format!("{}/{}", provider.name().to_lowercase(), config.model),
            api_key,
            http,
        })
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
        let response = self
            .http
            .post(self.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": [text],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let response = response.json::<serde_json::Value>().await?;
        let embedding = response["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| EmbedError::InvalidResponse("missing data[0].embedding".into()))?;

        embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| EmbedError::InvalidResponse(format!("non-numeric value {v}")))
            })
            .collect()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
