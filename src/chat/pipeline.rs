//! The request flow: memory, retrieval, prompt, completion, persist

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::models::{validate_message, validate_user_id, ChatReply};
use crate::config::Config;
use crate::context::PromptBuilder;
use crate::error::Result;
use crate::llm::{ChatModel, CompletionOptions};
use crate::memory::ConversationMemory;
use crate::metrics::METRICS;
use crate::retrieval::Retriever;

/// Answers one user message with memory and retrieved context
pub struct ChatPipeline {
    memory: Arc<ConversationMemory>,
    retriever: Arc<Retriever>,
    model: Arc<dyn ChatModel>,
    prompt: PromptBuilder,
    system_prompt: String,
    options: CompletionOptions,
}

impl ChatPipeline {
    pub fn new(
        memory: Arc<ConversationMemory>,
        retriever: Arc<Retriever>,
        model: Arc<dyn ChatModel>,
        prompt: PromptBuilder,
        config: &Config,
    ) -> Self {
        Self {
            memory,
            retriever,
            model,
            prompt,
            system_prompt: config.prompt.system_prompt.clone(),
            options: CompletionOptions {
                max_tokens: config.llm.max_tokens,
                temperature: config.llm.temperature,
                purpose: "chat",
            },
        }
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub async fn respond(&self, user_id: &str, message: &str) -> Result<ChatReply> {
        let start = Instant::now();
        let result = self.run(user_id, message).await;
        METRICS.record_chat(result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, user_id: &str, message: &str) -> Result<ChatReply> {
        validate_user_id(user_id)?;
        validate_message(message)?;

        let memory = self.memory.load(user_id).await?;

        let documents = match self.retriever.fetch(message).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Retrieval failed for user {}, answering without documents: {}", user_id, e);
                Vec::new()
            }
        };

        let prompt = self
            .prompt
            .build(&self.system_prompt, &memory, &documents, message);

        let reply = self.model.complete(&prompt, &self.options).await?;

        self.memory
            .store()
            .save_exchange(user_id, message, &reply)
            .await?;

        info!(
            "Answered user {}: history={}, documents={}, compacted={}",
            user_id,
            memory.messages.len(),
            documents.len(),
            memory.compacted
        );

        Ok(ChatReply {
            reply,
            retrieved_documents: documents,
            history_len: memory.messages.len(),
            compacted: memory.compacted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WordBasedEstimator;
    use crate::error::ChatError;
    use crate::llm::{ChatMessage, LlmError, Role};
    use crate::memory::{ConcatenationSummarizer, ConversationStore};
    use crate::retrieval::{EmbeddingError, EmbeddingProvider, InMemoryVectorStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Echoes the last user message and remembers every prompt
    #[derive(Default)]
    struct EchoModel {
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> std::result::Result<String, LlmError> {
            if self.fail {
                return Err(LlmError::Upstream {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.prompts.lock().unwrap().push(messages.to_vec());
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("echo: {}", last))
        }
    }

    struct BrokenEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbeddings {
        async fn embed_query(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Timeout("slow".to_string()))
        }

        async fn embed_documents(
            &self,
            _texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Timeout("slow".to_string()))
        }
    }

    async fn pipeline(model: Arc<EchoModel>) -> ChatPipeline {
        let config = Config::default();
        let store = ConversationStore::open_in_memory().await.unwrap();
        let memory = Arc::new(ConversationMemory::new(
            store,
            Arc::new(ConcatenationSummarizer),
            &config.memory,
        ));
        let retriever = Arc::new(Retriever::new(
            Arc::new(BrokenEmbeddings),
            Arc::new(InMemoryVectorStore::new()),
            &config.retrieval,
        ));
        let prompt = PromptBuilder::new(Arc::new(WordBasedEstimator::default()), 3000);
        ChatPipeline::new(memory, retriever, model, prompt, &config)
    }

    #[tokio::test]
    async fn test_exchange_is_stored_and_fed_back() {
        let model = Arc::new(EchoModel::default());
        let pipeline = pipeline(model.clone()).await;

        let first = pipeline.respond("alice", "hello").await.unwrap();
        assert_eq!(first.reply, "echo: hello");
        assert_eq!(first.history_len, 0);
        assert!(first.retrieved_documents.is_empty());

        let second = pipeline.respond("alice", "again").await.unwrap();
        assert_eq!(second.history_len, 2);

        let prompts = model.prompts.lock().unwrap();
        let last_prompt = prompts.last().unwrap();
        assert_eq!(last_prompt[1], ChatMessage::user("hello"));
        assert_eq!(last_prompt[2], ChatMessage::assistant("echo: hello"));
        assert_eq!(last_prompt[3].role, Role::User);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_any_work() {
        let model = Arc::new(EchoModel::default());
        let pipeline = pipeline(model.clone()).await;

        let err = pipeline.respond("bad id", "hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        let err = pipeline.respond("alice", "  ").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_stores_nothing() {
        let model = Arc::new(EchoModel {
            fail: true,
            ..EchoModel::default()
        });
        let pipeline = pipeline(model).await;

        let err = pipeline.respond("alice", "hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(_)));
        assert_eq!(pipeline.memory().store().count("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_long_conversation_reports_compaction() {
        let model = Arc::new(EchoModel::default());
        let pipeline = pipeline(model).await;

        let mut compacted_at = None;
        for turn in 0..12 {
            let reply = pipeline.respond("bob", &format!("message {}", turn)).await.unwrap();
            if reply.compacted {
                compacted_at = Some(turn);
                assert_eq!(reply.history_len, 10);
            }
        }
        // 11 exchanges leave 22 rows, so the 12th turn compacts
        assert_eq!(compacted_at, Some(11));
    }
}
