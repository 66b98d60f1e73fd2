//! Folding old conversation turns into a rolling summary

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::models::StoredMessage;
use crate::error::ChatError;
use crate::llm::{ChatMessage, ChatModel, CompletionOptions, LlmError};

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Merge `previous` (if any) and `messages` into one brief
    async fn summarize(
        &self,
        previous: Option<&str>,
        messages: &[StoredMessage],
        max_tokens: usize,
    ) -> Result<String, SummarizerError>;
}

/// Summarizer that asks the chat model for a brief
pub struct LlmSummarizer {
    model: Arc<dyn ChatModel>,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn build_prompt(&self, previous: Option<&str>, messages: &[StoredMessage], max_tokens: usize) -> String {
        let transcript = render_transcript(messages);
        let earlier = previous
            .filter(|s| !s.trim().is_empty())
            .map(|s| format!("Existing summary:\n{}\n\n", s))
            .unwrap_or_default();

        format!(
            "Update the summary of this conversation between a user and a supportive assistant. \
            Keep the user's situation, feelings, preferences and any open concerns; drop small talk. \
            Write in the language the user writes in and keep it under {} tokens.\n\n\
            {}New turns:\n{}",
            max_tokens, earlier, transcript
        )
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        messages: &[StoredMessage],
        max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        if messages.is_empty() {
            return Ok(previous.unwrap_or_default().to_string());
        }

        debug!("Summarizing {} messages, target: {} tokens", messages.len(), max_tokens);

        let prompt = vec![
            ChatMessage::system(
                "You are a concise summarizer. Extract key information and compress it efficiently.",
            ),
            ChatMessage::user(self.build_prompt(previous, messages, max_tokens)),
        ];
        let options = CompletionOptions {
            max_tokens,
            temperature: 0.3,
            purpose: "summarize",
        };

        let summary = self.model.complete(&prompt, &options).await?;
        if summary.trim().is_empty() {
            return Err(SummarizerError::EmptySummary);
        }
        Ok(summary.trim().to_string())
    }
}

/// Joins `role: content` lines; used when no model is available
#[derive(Debug, Default)]
pub struct ConcatenationSummarizer;

#[async_trait]
impl Summarizer for ConcatenationSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        messages: &[StoredMessage],
        _max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        let transcript = render_transcript(messages);
        Ok(match previous.filter(|s| !s.is_empty()) {
            Some(prev) if !transcript.is_empty() => format!("{}\n{}", prev, transcript),
            Some(prev) => prev.to_string(),
            None => transcript,
        })
    }
}

fn render_transcript(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Model error: {0}")]
    Model(#[from] LlmError),

    #[error("Model returned an empty summary")]
    EmptySummary,
}

impl From<SummarizerError> for ChatError {
    fn from(err: SummarizerError) -> Self {
        match err {
            SummarizerError::Model(e) => e.into(),
            other => ChatError::InvalidResponse(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use chrono::Utc;
    use std::sync::Mutex;

    fn msg(id: i64, role: Role, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            user_id: "alice".to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Records the prompt it receives and answers with a fixed reply
    struct RecordingModel {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            options: &CompletionOptions,
        ) -> Result<String, LlmError> {
            assert_eq!(options.purpose, "summarize");
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_concatenation_summarizer() {
        let summarizer = ConcatenationSummarizer;
        let messages = vec![msg(1, Role::User, "Hello"), msg(2, Role::Assistant, "World")];

        let fresh = tokio_test::block_on(summarizer.summarize(None, &messages, 100)).unwrap();
        assert_eq!(fresh, "user: Hello\nassistant: World");

        let extended =
            tokio_test::block_on(summarizer.summarize(Some("before"), &messages, 100)).unwrap();
        assert_eq!(extended, "before\nuser: Hello\nassistant: World");
    }

    #[tokio::test]
    async fn test_llm_summarizer_includes_previous_summary_and_turns() {
        let model = Arc::new(RecordingModel {
            reply: "  User is anxious about exams.  ".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = LlmSummarizer::new(model.clone());

        let summary = summarizer
            .summarize(
                Some("User studies law."),
                &[msg(1, Role::User, "I have exams next week")],
                300,
            )
            .await
            .unwrap();

        assert_eq!(summary, "User is anxious about exams.");
        let seen = model.seen.lock().unwrap();
        let prompt = &seen.last().unwrap().content;
        assert!(prompt.contains("User studies law."));
        assert!(prompt.contains("user: I have exams next week"));
        assert!(prompt.contains("300 tokens"));
    }

    #[tokio::test]
    async fn test_llm_summarizer_rejects_blank_reply() {
        let model = Arc::new(RecordingModel {
            reply: "   ".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = LlmSummarizer::new(model);
        let result = summarizer.summarize(None, &[msg(1, Role::User, "hi")], 50).await;
        assert!(matches!(result, Err(SummarizerError::EmptySummary)));
    }

    #[tokio::test]
    async fn test_no_messages_keeps_previous() {
        let model = Arc::new(RecordingModel {
            reply: "unused".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let summarizer = LlmSummarizer::new(model.clone());
        let summary = summarizer.summarize(Some("kept"), &[], 50).await.unwrap();
        assert_eq!(summary, "kept");
        assert!(model.seen.lock().unwrap().is_empty());
    }
}
