//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings` with batched input.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//!
//! Every failure (network, HTTP 4xx/5xx, bad payload, wrong dimensionality)
//! surfaces as [`Error::Embedding`]. Providers do not retry on their own;
//! the generation orchestrator owns the retry budget.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use testforge::config::EmbeddingConfig;
//! # use testforge::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use testforge_core::embedding::Embedder;
use testforge_core::{Error, Result};

use crate::config::EmbeddingConfig;

/// Instantiate the provider named in `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// --- disabled ---

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::Embedding(
            "embedding provider is disabled; set [embedding].provider".to_string(),
        ))
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed("").await.map(|_| Vec::new())
    }
}

// --- OpenAI-compatible /v1/embeddings ---

/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider `openai` needs [embedding].model"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("provider `openai` needs [embedding].dims"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            base_url,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        first(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            self.client
                .post(format!("{}/v1/embeddings", self.base_url.trim_end_matches('/')))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body),
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_shape(vectors, texts.len(), self.dims)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(pos, |i| i as usize);
        indexed.push((index, to_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// --- Ollama /api/embed ---

/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider `ollama` needs [embedding].model"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("provider `ollama` needs [embedding].dims"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        first(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            self.client
                .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
                .json(&body),
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_shape(vectors, texts.len(), self.dims)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Embedding("invalid Ollama response: missing embeddings array".into()))?
        .iter()
        .map(to_vector)
        .collect()
}

// --- helpers ---

async fn post_json(request: reqwest::RequestBuilder, provider: &str) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::Embedding(format!("{} connection error: {}", provider, e)))?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(Error::Embedding(format!(
            "{} API error {}: {}",
            provider, status, body_text
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::Embedding(format!("{} returned invalid JSON: {}", provider, e)))
}

fn to_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| Error::Embedding("embedding is not an array".into()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::Embedding("embedding contains a non-number".into()))
        })
        .collect()
}

fn check_shape(vectors: Vec<Vec<f32>>, expected_len: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_len {
        return Err(Error::Embedding(format!(
            "expected {} embeddings, got {}",
            expected_len,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::Embedding(format!(
            "expected {} dimensions, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(vectors)
}

fn first(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    vectors
        .pop()
        .ok_or_else(|| Error::Embedding("empty embedding response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_response_ordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_ollama_response_and_shape_check() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5, 0.0]]});
        let v = parse_ollama_response(&json).unwrap();
        assert!(check_shape(v.clone(), 1, 3).is_ok());
        assert!(matches!(check_shape(v, 1, 4), Err(Error::Embedding(_))));
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let e = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert!(matches!(e.embed("x").await, Err(Error::Embedding(_))));
    }
}
