//! Retrieval-augmented generation support
//!
//! Reference documents are split into paragraph chunks, embedded and stored
//! in a vector store. At chat time the user's message is embedded and the
//! closest chunks above a similarity threshold are handed to the prompt.

pub mod embeddings;
pub mod retriever;
pub mod splitter;
pub mod store;

pub use embeddings::{EmbeddingError, EmbeddingProvider, OpenAiEmbeddings};
pub use retriever::Retriever;
pub use splitter::TextSplitter;
pub use store::{Document, InMemoryVectorStore, QdrantVectorStore, ScoredDocument, VectorStore};
