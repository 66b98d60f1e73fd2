//! Conversational companion with memory and retrieval-augmented replies
//!
//! A chat turn loads the user's bounded history (summarizing older turns when
//! it grows too long), retrieves related reference passages, assembles a
//! prompt within a token budget, asks an OpenAI-compatible model for a reply
//! and stores the exchange.

pub mod api;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod retrieval;

pub use config::Config;
pub use error::{ChatError, Result};

pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::chat::{ChatPipeline, ChatReply};
    pub use crate::config::Config;
    pub use crate::context::PromptBuilder;
    pub use crate::error::{ChatError, Result};
    pub use crate::llm::{ChatMessage, ChatModel, CompletionOptions, OpenAiChatClient, Role};
    pub use crate::memory::{ConversationMemory, ConversationStore, MemoryContext};
    pub use crate::retrieval::{EmbeddingProvider, Retriever, VectorStore};
}
