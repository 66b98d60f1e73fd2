//! Prompt assembly under a token budget

use std::sync::Arc;
use tracing::debug;

use super::token_estimator::TokenEstimator;
use crate::llm::ChatMessage;
use crate::memory::MemoryContext;
use crate::metrics::METRICS;

const SUMMARY_HEADER: &str = "Summary of the earlier conversation:";
const DOCUMENTS_HEADER: &str = "Reference material (use it only if relevant):";

/// Builds the message list sent to the chat model
pub struct PromptBuilder {
    estimator: Arc<dyn TokenEstimator>,
    max_prompt_tokens: usize,
}

impl PromptBuilder {
    pub fn new(estimator: Arc<dyn TokenEstimator>, max_prompt_tokens: usize) -> Self {
        Self {
            estimator,
            max_prompt_tokens,
        }
    }

    /// Assemble system prompt, summary, documents, history and the new message.
    ///
    /// Over budget, history is dropped oldest first and then documents last
    /// to first. The system prompt, summary and user message always stay.
    pub fn build(
        &self,
        system_prompt: &str,
        memory: &MemoryContext,
        documents: &[String],
        user_input: &str,
    ) -> Vec<ChatMessage> {
        let history = memory.chat_messages();
        let mut docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let mut history_start = 0;

        loop {
            let messages = assemble(
                system_prompt,
                memory.summary.as_deref(),
                &docs,
                &history[history_start..],
                user_input,
            );
            let tokens = self.estimator.estimate_messages(&messages);

            if tokens <= self.max_prompt_tokens {
                METRICS.prompt_tokens.observe(tokens as f64);
                return messages;
            }
            if history_start < history.len() {
                history_start += 1;
            } else if !docs.is_empty() {
                docs.pop();
            } else {
                debug!(
                    "Prompt still {} tokens over a budget of {} after trimming",
                    tokens, self.max_prompt_tokens
                );
                METRICS.prompt_tokens.observe(tokens as f64);
                return messages;
            }
        }
    }
}

fn assemble(
    system_prompt: &str,
    summary: Option<&str>,
    documents: &[&str],
    history: &[ChatMessage],
    user_input: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 4);
    messages.push(ChatMessage::system(system_prompt));

    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(format!("{}\n{}", SUMMARY_HEADER, summary)));
    }

    if !documents.is_empty() {
        let listed = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("{}. {}", i + 1, doc))
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(ChatMessage::system(format!("{}\n{}", DOCUMENTS_HEADER, listed)));
    }

    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(user_input));
    messages
}
