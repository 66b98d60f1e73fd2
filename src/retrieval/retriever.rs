//! Similarity retrieval and document ingestion

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::embeddings::EmbeddingProvider;
use super::splitter::TextSplitter;
use super::store::{Document, VectorStore};
use crate::config::RetrievalConfig;
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;

/// Finds reference passages related to a query
pub struct Retriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    splitter: TextSplitter,
    score_threshold: f32,
    max_docs: usize,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap),
            score_threshold: config.score_threshold,
            max_docs: config.max_docs,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Page contents of the best matches, best first; empty when nothing clears the threshold
    pub async fn fetch(&self, query: &str) -> Result<Vec<String>> {
        let vector = self.embeddings.embed_query(query).await?;
        let hits = self
            .store
            .search(&vector, self.max_docs, self.score_threshold)
            .await?;

        METRICS.retrieval_documents.observe(hits.len() as f64);
        debug!("Retrieved {} documents", hits.len());

        Ok(hits
            .into_iter()
            .take(self.max_docs)
            .map(|hit| hit.text)
            .collect())
    }

    /// Split, embed and store `text`; returns the number of chunks written
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<usize> {
        let chunks = self.splitter.split(text);
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors = self.embeddings.embed_documents(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(ChatError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let documents: Vec<Document> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Document::new(source, chunk, vector))
            .collect();

        let written = self.store.upsert(documents).await?;
        info!("Ingested {} chunks from {}", written, source);
        Ok(written)
    }

    /// Ingest a UTF-8 text file under its file stem
    pub async fn ingest_file(&self, path: &Path) -> Result<usize> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChatError::Internal(format!("Failed to read {}: {}", path.display(), e)))?;
        let source = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.ingest_text(&source, &text).await
    }

    /// Load `seed_files` when the collection is still empty
    pub async fn seed(&self, seed_files: &[impl AsRef<Path>]) -> Result<usize> {
        let existing = self.store.count().await?;
        if existing > 0 {
            info!("Collection already holds {} documents, skipping seed ingestion", existing);
            return Ok(0);
        }

        let mut total = 0;
        for path in seed_files {
            let path = path.as_ref();
            if !path.exists() {
                warn!("Seed file {} not found, skipping", path.display());
                continue;
            }
            total += self.ingest_file(path).await?;
        }
        Ok(total)
    }
}
