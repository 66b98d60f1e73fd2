use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use rag_companion::{
    api::{build_router, AppState},
    chat::ChatPipeline,
    config::Config,
    context::{default_estimator, PromptBuilder},
    llm::{ChatModel, OpenAiChatClient},
    logging,
    memory::{ConcatenationSummarizer, ConversationMemory, ConversationStore, LlmSummarizer, Summarizer},
    retrieval::{EmbeddingProvider, InMemoryVectorStore, OpenAiEmbeddings, QdrantVectorStore, Retriever, VectorStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    logging::init(&config.logging)?;

    info!("Starting rag-companion {}", env!("CARGO_PKG_VERSION"));

    let store = ConversationStore::open(&config.memory.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.memory.database_path.display()))?;

    let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatClient::new(&config.llm)?);
    if config.llm.api_key.is_none() {
        warn!("No completion API key configured; requests will be sent unauthenticated");
    }

    let summarizer: Arc<dyn Summarizer> = if config.llm.api_key.is_some() {
        Arc::new(LlmSummarizer::new(model.clone()))
    } else {
        Arc::new(ConcatenationSummarizer)
    };
    let memory = Arc::new(ConversationMemory::new(store, summarizer, &config.memory));

    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let vectors: Arc<dyn VectorStore> = if config.vector_db.url.trim().is_empty() {
        info!("No vector database configured, using the in-memory store");
        Arc::new(InMemoryVectorStore::new())
    } else {
        info!("Using Qdrant at {}", config.vector_db.url);
        Arc::new(QdrantVectorStore::connect(
            &config.vector_db.url,
            config.vector_db.api_key.as_ref(),
            config.vector_db.collection.clone(),
        )?)
    };
    vectors
        .ensure_collection(config.embedding.dimensions)
        .await
        .context("failed to prepare the vector collection")?;

    let retriever = Arc::new(Retriever::new(embeddings, vectors, &config.retrieval));
    if config.retrieval.ingest_on_startup {
        let chunks = retriever
            .seed(config.retrieval.seed_files.as_slice())
            .await
            .context("seed ingestion failed")?;
        info!("Seed ingestion stored {} chunks", chunks);
    }

    let prompt = PromptBuilder::new(default_estimator(), config.memory.max_prompt_tokens);
    let pipeline = Arc::new(ChatPipeline::new(memory, retriever, model, prompt, &config));
    let app = build_router(AppState { pipeline }, config.server.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
