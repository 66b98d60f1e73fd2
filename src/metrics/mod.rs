//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Encoder, Histogram, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Chat endpoint
    pub chat_requests: CounterVec,
    pub chat_request_duration: Histogram,

    // Upstream completion calls
    pub llm_requests: CounterVec,
    pub llm_request_duration: HistogramVec,
    pub llm_circuit_open: CounterVec,

    // Retrieval
    pub embedding_cache_hits: Counter,
    pub embedding_cache_misses: Counter,
    pub retrieval_documents: Histogram,

    // Memory and prompt
    pub memory_compactions: Counter,
    pub prompt_tokens: Histogram,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let chat_requests = register_counter_vec_with_registry!(
            Opts::new("chat_requests_total", "Total chat requests"),
            &["status"],
            registry
        )?;

        let chat_request_duration = register_histogram_with_registry!(
            "chat_request_duration_seconds",
            "End-to-end chat request duration in seconds",
            registry
        )?;

        let llm_requests = register_counter_vec_with_registry!(
            Opts::new("llm_requests_total", "Total upstream completion requests"),
            &["operation", "status"],
            registry
        )?;

        let llm_request_duration = register_histogram_vec_with_registry!(
            "llm_request_duration_seconds",
            "Upstream completion request duration in seconds",
            &["operation"],
            registry
        )?;

        let llm_circuit_open = register_counter_vec_with_registry!(
            Opts::new("llm_circuit_open_total", "Requests rejected by an open circuit"),
            &["operation"],
            registry
        )?;

        let embedding_cache_hits = register_counter_with_registry!(
            Opts::new("embedding_cache_hits_total", "Query embeddings served from cache"),
            registry
        )?;

        let embedding_cache_misses = register_counter_with_registry!(
            Opts::new("embedding_cache_misses_total", "Query embeddings fetched upstream"),
            registry
        )?;

        let retrieval_documents = register_histogram_with_registry!(
            "retrieval_documents",
            "Documents kept per retrieval",
            vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0],
            registry
        )?;

        let memory_compactions = register_counter_with_registry!(
            Opts::new("memory_compactions_total", "Conversation histories summarized and compacted"),
            registry
        )?;

        let prompt_tokens = register_histogram_with_registry!(
            "prompt_tokens",
            "Estimated prompt tokens per completion",
            vec![100.0, 250.0, 500.0, 1000.0, 2000.0, 3000.0, 4000.0, 8000.0],
            registry
        )?;

        Ok(Self {
            registry,
            chat_requests,
            chat_request_duration,
            llm_requests,
            llm_request_duration,
            llm_circuit_open,
            embedding_cache_hits,
            embedding_cache_misses,
            retrieval_documents,
            memory_compactions,
            prompt_tokens,
        })
    }

    /// Record a finished chat request
    pub fn record_chat(&self, success: bool, seconds: f64) {
        let status = if success { "success" } else { "error" };
        self.chat_requests.with_label_values(&[status]).inc();
        self.chat_request_duration.observe(seconds);
    }

    /// Record an upstream completion attempt outcome
    pub fn record_llm(&self, operation: &str, status: &str) {
        self.llm_requests.with_label_values(&[operation, status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}
