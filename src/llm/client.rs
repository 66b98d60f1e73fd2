//! OpenAI-compatible chat completion client with retry and circuit breaker

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
use super::models::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, CompletionOptions};
use crate::config::LlmConfig;
use crate::error::ChatError;
use crate::metrics::METRICS;

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Completion client errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Network failures, timeouts, throttling and server errors are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) => true,
            Self::Upstream { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::CircuitOpen(_) | Self::InvalidResponse(_) => false,
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::CircuitOpen(op) => ChatError::CircuitOpen(op),
            LlmError::Timeout(msg) => ChatError::Timeout(msg),
            LlmError::InvalidResponse(msg) => ChatError::InvalidResponse(msg),
            other => ChatError::Upstream(other.to_string()),
        }
    }
}

/// A language model that turns a message list into a reply
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

/// Client for `/v1/chat/completions`
pub struct OpenAiChatClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: usize,
    retry_backoff: Duration,
    breaker: CircuitBreaker,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failures,
            reset_timeout: config.breaker_reset_timeout(),
        });

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            breaker,
        })
    }

    /// Exponential backoff before retry `attempt` (1-based)
    fn calculate_backoff(&self, attempt: usize) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1) as u32);
        self.retry_backoff.saturating_mul(multiplier)
    }

    async fn call_once(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        // each purpose (chat, summarize) trips independently
        let purpose = options.purpose;
        let start = Instant::now();

        if self.breaker.is_open(purpose) {
            METRICS.llm_circuit_open.with_label_values(&[purpose]).inc();
            error!("Circuit breaker is open for {} completions", purpose);
            return Err(LlmError::CircuitOpen(purpose.to_string()));
        }

        debug!(
            "Requesting completion: purpose={}, messages={}, max_tokens={}",
            purpose,
            messages.len(),
            options.max_tokens
        );

        let mut attempt = 0;
        let result = loop {
            attempt += 1;

            match self.call_once(messages, options).await {
                Ok(reply) => {
                    self.breaker.mark_success(purpose);
                    METRICS.record_llm(purpose, "success");
                    break Ok(reply);
                }
                Err(e) => {
                    METRICS.record_llm(purpose, "error");
                    if e.is_retryable() {
                        self.breaker.mark_failure(purpose);
                    } else {
                        // the endpoint answered; the request itself was at fault
                        self.breaker.mark_success(purpose);
                    }

                    let tripped = self.breaker.state(purpose) == BreakerState::Open;
                    if !e.is_retryable() || tripped || attempt > self.max_retries {
                        error!("Completion failed after {} attempt(s): {}", attempt, e);
                        break Err(e);
                    }

                    let backoff = self.calculate_backoff(attempt);
                    warn!(
                        "Completion attempt {} failed: {}, retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        METRICS
            .llm_request_duration
            .with_label_values(&[purpose])
            .observe(start.elapsed().as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::Role;
    use serde_json::json;

    fn config_for(server: &mockito::Server) -> LlmConfig {
        LlmConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            api_key: Some(SecretString::new("sk-test".to_string())),
            max_retries: 2,
            retry_backoff_ms: 1,
            ..LlmConfig::default()
        }
    }

    fn completion_body(content: &str) -> String {
        json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn test_calculate_backoff() {
        let client = OpenAiChatClient::new(&LlmConfig::default()).unwrap();
        assert_eq!(client.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(client.calculate_backoff(2), Duration::from_millis(400));
        assert_eq!(client.calculate_backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Timeout("t".into()).is_retryable());
        assert!(LlmError::Upstream { status: 429, body: String::new() }.is_retryable());
        assert!(LlmError::Upstream { status: 503, body: String::new() }.is_retryable());
        assert!(!LlmError::Upstream { status: 401, body: String::new() }.is_retryable());
        assert!(!LlmError::InvalidResponse("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_complete_sends_model_and_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 150,
                "messages": [{ "role": "user", "content": "hello" }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("Hi there!"))
            .create_async()
            .await;

        let client = OpenAiChatClient::new(&config_for(&server)).unwrap();
        let reply = client
            .complete(&[ChatMessage::new(Role::User, "hello")], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(reply, "Hi there!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_server_errors_up_to_limit() {
        let mut server = mockito::Server::new_async().await;
        // one initial attempt plus two retries
        let failing = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = OpenAiChatClient::new(&config_for(&server)).unwrap();
        let result = client
            .complete(&[ChatMessage::user("hello")], &CompletionOptions::default())
            .await;

        assert!(matches!(result, Err(LlmError::Upstream { status: 503, .. })));
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let client = OpenAiChatClient::new(&config_for(&server)).unwrap();
        let result = client
            .complete(&[ChatMessage::user("hello")], &CompletionOptions::default())
            .await;

        assert!(matches!(result, Err(LlmError::Upstream { status: 400, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = OpenAiChatClient::new(&config_for(&server)).unwrap();
        let result = client
            .complete(&[ChatMessage::user("hello")], &CompletionOptions::default())
            .await;

        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.max_retries = 0;
        config.circuit_breaker_failures = 1;
        let client = OpenAiChatClient::new(&config).unwrap();

        let first = client
            .complete(&[ChatMessage::user("a")], &CompletionOptions::default())
            .await;
        assert!(first.is_err());

        let second = client
            .complete(&[ChatMessage::user("b")], &CompletionOptions::default())
            .await;
        assert!(matches!(second, Err(LlmError::CircuitOpen(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_tripped_purpose_does_not_block_others() {
        let mut server = mockito::Server::new_async().await;
        let summarize = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::Regex("older turns".to_string()))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::Regex("hello".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("Hi!"))
            .expect(1)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.max_retries = 0;
        config.circuit_breaker_failures = 1;
        let client = OpenAiChatClient::new(&config).unwrap();

        let summarize_options = CompletionOptions {
            purpose: "summarize",
            ..CompletionOptions::default()
        };
        let failed = client
            .complete(&[ChatMessage::user("older turns")], &summarize_options)
            .await;
        assert!(matches!(failed, Err(LlmError::Upstream { status: 500, .. })));
        let blocked = client
            .complete(&[ChatMessage::user("older turns")], &summarize_options)
            .await;
        assert!(matches!(blocked, Err(LlmError::CircuitOpen(ref op)) if op == "summarize"));

        let reply = client
            .complete(&[ChatMessage::user("hello")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "Hi!");

        summarize.assert_async().await;
        chat.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip_breaker() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .expect(3)
            .create_async()
            .await;

        let mut config = config_for(&server);
        config.circuit_breaker_failures = 1;
        let client = OpenAiChatClient::new(&config).unwrap();

        for _ in 0..3 {
            let result = client
                .complete(&[ChatMessage::user("hello")], &CompletionOptions::default())
                .await;
            assert!(matches!(result, Err(LlmError::Upstream { status: 400, .. })));
        }
        assert_eq!(client.breaker.state("chat"), BreakerState::Closed);
        mock.assert_async().await;
    }
}
