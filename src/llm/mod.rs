//! Language model access
//!
//! A [`ChatModel`] turns a list of chat messages into a reply. The production
//! implementation talks to an OpenAI-compatible completion endpoint and is
//! guarded by retries with exponential backoff plus a circuit breaker.

pub mod circuit_breaker;
pub mod client;
pub mod models;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use client::{ChatModel, LlmError, OpenAiChatClient};
pub use models::{ChatMessage, CompletionOptions, Role};
