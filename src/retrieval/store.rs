//! Vector stores for document chunks

use async_trait::async_trait;
use qdrant_client::{
    client::{Payload, QdrantClient},
    qdrant::{
        value::Kind, CountPoints, CreateCollection, Distance, PointStruct, SearchPoints,
        VectorParams, VectorsConfig,
    },
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ChatError, Result};

/// A chunk of reference text with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub text: String,
    pub vector: Vec<f32>,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            text: text.into(),
            vector,
        }
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Similarity search over embedded chunks
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the backing collection for `dimensions`-sized vectors if missing
    async fn ensure_collection(&self, dimensions: usize) -> Result<()>;

    async fn upsert(&self, documents: Vec<Document>) -> Result<usize>;

    /// Hits with cosine similarity `>= score_threshold`, best first
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>>;

    async fn count(&self) -> Result<u64>;
}

/// Qdrant-backed store; payload carries `text` and `source`
pub struct QdrantVectorStore {
    client: QdrantClient,
    collection: String,
}

impl QdrantVectorStore {
    pub fn connect(url: &str, api_key: Option<&SecretString>, collection: impl Into<String>) -> Result<Self> {
        let mut builder = QdrantClient::from_url(url);
        if let Some(key) = api_key {
            builder = builder.with_api_key(key.expose_secret().to_string());
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::VectorStore(format!("Failed to connect to Qdrant: {}", e)))?;

        Ok(Self {
            client,
            collection: collection.into(),
        })
    }
}

fn payload_string(payload: &HashMap<String, qdrant_client::qdrant::Value>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| ChatError::VectorStore(format!("Failed to list collections: {}", e)))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            info!("Creating collection: {}", self.collection);

            self.client
                .create_collection(&CreateCollection {
                    collection_name: self.collection.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(qdrant_client::qdrant::vectors_config::Config::Params(
                            VectorParams {
                                size: dimensions as u64,
                                distance: Distance::Cosine.into(),
                                ..Default::default()
                            },
                        )),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| ChatError::VectorStore(format!("Failed to create collection: {}", e)))?;
        }

        Ok(())
    }

    async fn upsert(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let count = documents.len();

        let points: Vec<PointStruct> = documents
            .into_iter()
            .map(|doc| {
                let mut payload = Payload::new();
                payload.insert("text", doc.text);
                payload.insert("source", doc.source);
                PointStruct::new(doc.id, doc.vector, payload)
            })
            .collect();

        self.client
            .upsert_points(&self.collection, None, points, None)
            .await
            .map_err(|e| ChatError::VectorStore(format!("Failed to upsert points: {}", e)))?;

        debug!("Upserted {} points into {}", count, self.collection);
        Ok(count)
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection.clone(),
                vector: vector.to_vec(),
                limit: limit as u64,
                score_threshold: Some(score_threshold),
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| ChatError::VectorStore(format!("Failed to search: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                Some(ScoredDocument {
                    text: payload_string(&point.payload, "text")?,
                    source: payload_string(&point.payload, "source").unwrap_or_default(),
                    score: point.score,
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let response = self
            .client
            .count(&CountPoints {
                collection_name: self.collection.clone(),
                exact: Some(true),
                ..Default::default()
            })
            .await
            .map_err(|e| ChatError::VectorStore(format!("Failed to count points: {}", e)))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

/// Brute-force cosine store held in process memory
#[derive(Default)]
pub struct InMemoryVectorStore {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity; zero vectors and length mismatches score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, _dimensions: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, documents: Vec<Document>) -> Result<usize> {
        let count = documents.len();
        let mut stored = self
            .documents
            .write()
            .map_err(|_| ChatError::Internal("vector store lock poisoned".to_string()))?;
        for doc in documents {
            match stored.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc,
                None => stored.push(doc),
            }
        }
        Ok(count)
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let stored = self
            .documents
            .read()
            .map_err(|_| ChatError::Internal("vector store lock poisoned".to_string()))?;

        let mut hits: Vec<ScoredDocument> = stored
            .iter()
            .map(|doc| ScoredDocument {
                source: doc.source.clone(),
                text: doc.text.clone(),
                score: cosine_similarity(vector, &doc.vector),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        let stored = self
            .documents
            .read()
            .map_err(|_| ChatError::Internal("vector store lock poisoned".to_string()))?;
        Ok(stored.len() as u64)
    }
}
