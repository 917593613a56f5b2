//! Text embedding for the similarity index.
//!
//! Two implementations: a deterministic feature-hashing embedder that needs
//! no network (development, tests, air-gapped deployments) and a client for
//! OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use crate::backend::LlmError;
use crate::error::OracleError;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedder identifier, stored with each vector.
    fn id(&self) -> &str;

    /// Embed a text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError>;
}

/// Signed feature hashing over word unigrams and bigrams, L2-normalized.
///
/// Stable across processes and platforms (FNV-1a over UTF-8 bytes).
pub struct HashingEmbedder {
    id: String,
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(16);
        Self {
            id: format!("hashing-{}", dimensions),
            dimensions,
        }
    }

    /// Synchronous embedding; the trait method wraps this.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let index = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign * weight;
        };

        for word in &words {
            add(word, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        Ok(self.embed_text(text))
    }
}

/// Client for OpenAI-compatible `/embeddings`.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            retry,
        })
    }

    async fn send(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            });
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited { retry_after_ms: None });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                LlmError::Unavailable(format!("HTTP {}: {}", status, body))
            } else {
                LlmError::RequestFailed(format!("HTTP {}: {}", status, body))
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::ParseError("No embedding in response".to_string()))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        let vector = self.retry.run("embedding", || self.send(text)).await?;
        if vector.is_empty() {
            return Err(OracleError::Malformed("empty embedding".to_string()));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("Garbage not collected on MG Road");
        let b = embedder.embed_text("Garbage not collected on MG Road");
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashing_ignores_case_and_punctuation() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("Streetlight broken, Sector 5!");
        let b = embedder.embed_text("streetlight BROKEN sector 5");
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_texts_closer_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let base = embedder.embed_text("garbage pile near the market not collected");
        let related = embedder.embed_text("garbage pile near the market still not collected");
        let unrelated = embedder.embed_text("water pipeline burst flooding basement");
        assert!(cosine(&base, &related) > cosine(&base, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(32);
        assert!(embedder.embed_text("  ,,  ").iter().all(|v| *v == 0.0));
        assert_eq!(embedder.id(), "hashing-32");
    }
}
