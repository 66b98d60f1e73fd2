//! Chat orchestration

pub mod models;
pub mod pipeline;

pub use models::{validate_message, validate_user_id, ChatReply, ChatRequest};
pub use pipeline::ChatPipeline;
