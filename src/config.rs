//! Layered service configuration
//!
//! Defaults are overridden by an optional TOML file and then by
//! `RAG_COMPANION__SECTION__FIELD` environment variables. Bare
//! `OPENAI_API_KEY` / `QDRANT_API_KEY` fill the key fields when unset.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ChatError, Result};

pub const ENV_PREFIX: &str = "RAG_COMPANION";
pub const CONFIG_PATH_ENV: &str = "RAG_COMPANION_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a kind and understanding chatbot. Always provide helpful and \
clear responses with a friendly and respectful tone. Focus on solving \
the user's problem or providing information, and avoid phrases like \
'I'm sorry' unless absolutely necessary. Be positive, encouraging, and concise.";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_db: VectorDbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_max_body_bytes() -> usize { 1024 * 1024 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Completion endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,
    #[serde(default = "default_breaker_reset")]
    pub circuit_breaker_reset_secs: u64,
}

fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_llm_max_tokens() -> usize { 150 }
fn default_llm_temperature() -> f32 { 0.7 }
fn default_llm_timeout_ms() -> u64 { 30_000 }
fn default_retries() -> usize { 2 }
fn default_retry_backoff_ms() -> u64 { 200 }
fn default_breaker_failures() -> usize { 5 }
fn default_breaker_reset() -> u64 { 30 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            timeout_ms: default_llm_timeout_ms(),
            max_retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn breaker_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_reset_secs)
    }
}

/// Embedding endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_embedding_endpoint() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-ada-002".to_string() }
fn default_embedding_dimensions() -> usize { 1536 }
fn default_embedding_timeout_ms() -> u64 { 10_000 }
fn default_cache_size() -> u64 { 1000 }
fn default_cache_ttl() -> u64 { 600 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_ms: default_embedding_timeout_ms(),
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorDbConfig {
    /// Empty URL selects the in-process store
    #[serde(default = "default_vector_db_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
}

fn default_vector_db_url() -> String { "http://localhost:6334".to_string() }
fn default_collection() -> String { "psych_support".to_string() }

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            url: default_vector_db_url(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_max_docs")]
    pub max_docs: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_seed_files")]
    pub seed_files: Vec<PathBuf>,
    #[serde(default)]
    pub ingest_on_startup: bool,
}

fn default_score_threshold() -> f32 { 0.7 }
fn default_max_docs() -> usize { 2 }
fn default_chunk_size() -> usize { 200 }
fn default_chunk_overlap() -> usize { 50 }
fn default_seed_files() -> Vec<PathBuf> { vec![PathBuf::from("data/psych_support.txt")] }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            max_docs: default_max_docs(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            seed_files: default_seed_files(),
            ingest_on_startup: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// History length that triggers compaction when exceeded
    #[serde(default = "default_max_history_rows")]
    pub max_history_rows: usize,
    /// Rows left verbatim after compaction
    #[serde(default = "default_keep_recent_rows")]
    pub keep_recent_rows: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
}

fn default_database_path() -> PathBuf { PathBuf::from("chat_memory.db") }
fn default_max_history_rows() -> usize { 20 }
fn default_keep_recent_rows() -> usize { 10 }
fn default_summary_max_tokens() -> usize { 300 }
fn default_max_prompt_tokens() -> usize { 3000 }

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_history_rows: default_max_history_rows(),
            keep_recent_rows: default_keep_recent_rows(),
            summary_max_tokens: default_summary_max_tokens(),
            max_prompt_tokens: default_max_prompt_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_system_prompt() -> String { DEFAULT_SYSTEM_PROMPT.to_string() }

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
        }
    }
}

impl Config {
    /// Load from `.env`, the optional TOML file and the environment
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(path)
    }

    /// Load with an explicit TOML path; a missing file is not an error
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let built = ::config::Config::builder()
            .add_source(
                ::config::File::from(path.as_path())
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let mut config: Config = built.try_deserialize()?;
        config.apply_key_fallbacks();
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let built = ::config::Config::builder()
            .add_source(::config::File::from_str(source, ::config::FileFormat::Toml))
            .build()?;
        Ok(built.try_deserialize()?)
    }

    fn apply_key_fallbacks(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if self.llm.api_key.is_none() {
                self.llm.api_key = Some(SecretString::new(key.clone()));
            }
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(SecretString::new(key));
            }
        }
        if self.vector_db.api_key.is_none() {
            if let Ok(key) = std::env::var("QDRANT_API_KEY") {
                self.vector_db.api_key = Some(SecretString::new(key));
            }
        }
    }

    /// Reject combinations the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.memory.keep_recent_rows >= self.memory.max_history_rows {
            return Err(ChatError::Configuration(format!(
                "memory.keep_recent_rows ({}) must be below memory.max_history_rows ({})",
                self.memory.keep_recent_rows, self.memory.max_history_rows
            )));
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return Err(ChatError::Configuration(format!(
                "retrieval.chunk_overlap ({}) must be below retrieval.chunk_size ({})",
                self.retrieval.chunk_overlap, self.retrieval.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(ChatError::Configuration(format!(
                "retrieval.score_threshold must be within [0, 1], got {}",
                self.retrieval.score_threshold
            )));
        }
        if self.retrieval.max_docs == 0 {
            return Err(ChatError::Configuration(
                "retrieval.max_docs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ChatError::Configuration(format!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }
}
