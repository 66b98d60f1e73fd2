//! Conversation memory
//!
//! Chat turns are persisted per user in SQLite. When a user's history grows
//! past the configured limit, the older turns are folded into a rolling
//! summary and deleted, so prompts stay bounded.

pub mod manager;
pub mod models;
pub mod store;
pub mod summarizer;

pub use manager::ConversationMemory;
pub use models::{MemoryContext, StoredMessage};
pub use store::ConversationStore;
pub use summarizer::{ConcatenationSummarizer, LlmSummarizer, Summarizer, SummarizerError};
