//! Prompt context assembly
//!
//! Combines the system prompt, the rolling conversation summary, retrieved
//! reference material and recent turns into one message list that fits the
//! configured token budget.

pub mod prompt;
pub mod token_estimator;

pub use prompt::PromptBuilder;
pub use token_estimator::{default_estimator, TiktokenEstimator, TokenEstimator, WordBasedEstimator};
