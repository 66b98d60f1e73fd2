//! Text embeddings over an OpenAI-compatible `/v1/embeddings` endpoint

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, error};

use crate::config::EmbeddingConfig;
use crate::error::ChatError;
use crate::metrics::METRICS;

const OPERATION: &str = "embedding";
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Embedding errors
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<EmbeddingError> for ChatError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Timeout(msg) => ChatError::Timeout(msg),
            EmbeddingError::InvalidResponse(msg) => ChatError::InvalidResponse(msg),
            other => ChatError::Upstream(other.to_string()),
        }
    }
}

/// Turns text into vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// One vector per input, in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embedding client with a query cache
pub struct OpenAiEmbeddings {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    cache: Cache<String, Vec<f32>>,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        let cache = Cache::builder()
            .max_capacity(config.cache_size)
            .time_to_live(config.cache_ttl())
            .build();

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            cache,
        })
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let start = Instant::now();
        let result = self.send(input).await;

        let status = if result.is_ok() { "success" } else { "error" };
        METRICS.record_llm(OPERATION, status);
        METRICS
            .llm_request_duration
            .with_label_values(&[OPERATION])
            .observe(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            error!("Embedding request for {} input(s) failed: {}", input.len(), e);
        }
        result
    }

    async fn send(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(e.to_string())
            } else {
                EmbeddingError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Upstream {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != input.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = self.cache_key(text);
        if let Some(vector) = self.cache.get(&key).await {
            METRICS.embedding_cache_hits.inc();
            return Ok(vector);
        }
        METRICS.embedding_cache_misses.inc();

        let vector = self
            .request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding list".to_string()))?;

        self.cache.insert(key, vector.clone()).await;
        Ok(vector)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} documents", texts.len());
        self.request(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_for(server: &mockito::Server) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: format!("{}/v1/embeddings", server.url()),
            api_key: Some(SecretString::new("sk-test".to_string())),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_documents_reorders_by_index() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "text-embedding-ada-002",
                "input": ["first", "second"]
            })))
            .with_status(200)
            .with_body(
                json!({
                    "data": [
                        { "embedding": [0.0, 1.0], "index": 1 },
                        { "embedding": [1.0, 0.0], "index": 0 }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OpenAiEmbeddings::new(&config_for(&server)).unwrap();
        let vectors = client
            .embed_documents(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_embeddings_are_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(json!({ "data": [{ "embedding": [0.5, 0.5], "index": 0 }] }).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = OpenAiEmbeddings::new(&config_for(&server)).unwrap();
        let first = client.embed_query("how do I sleep better").await.unwrap();
        let second = client.embed_query("how do I sleep better").await.unwrap();

        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/embeddings")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let client = OpenAiEmbeddings::new(&config_for(&server)).unwrap();
        let err = client.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Upstream { status: 401, .. }));
        assert!(matches!(ChatError::from(err), ChatError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(json!({ "data": [] }).to_string())
            .create_async()
            .await;

        let client = OpenAiEmbeddings::new(&config_for(&server)).unwrap();
        let err = client.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[test]
    fn test_cache_key_depends_on_model() {
        let a = OpenAiEmbeddings::new(&EmbeddingConfig::default()).unwrap();
        let b = OpenAiEmbeddings::new(&EmbeddingConfig {
            model: "other".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(a.cache_key("hi"), a.cache_key("hi"));
        assert_ne!(a.cache_key("hi"), b.cache_key("hi"));
    }
}
