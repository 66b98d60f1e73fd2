//! HTTP handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::extract::ApiJson;
use super::models::{
    DeleteHistoryResponse, HealthResponse, HistoryMessage, HistoryResponse, IngestRequest,
    IngestResponse, SearchRequest, SearchResponse,
};
use crate::chat::{validate_message, validate_user_id, ChatPipeline, ChatReply, ChatRequest};
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
}

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Json<ChatReply>> {
    validate_user_id(&request.user_id)?;
    validate_message(&request.message)?;
    info!("Chat request: user_id={}, chars={}", request.user_id, request.message.chars().count());
    let reply = state.pipeline.respond(&request.user_id, &request.message).await?;
    Ok(Json(reply))
}

/// GET /api/v1/chat/:user_id/history
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<HistoryResponse>> {
    validate_user_id(&user_id)?;

    let store = state.pipeline.memory().store();
    let summary = store.summary(&user_id).await?;
    let messages = store
        .history(&user_id)
        .await?
        .into_iter()
        .map(HistoryMessage::from)
        .collect();

    Ok(Json(HistoryResponse {
        user_id,
        summary,
        messages,
    }))
}

/// DELETE /api/v1/chat/:user_id
pub async fn delete_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteHistoryResponse>> {
    validate_user_id(&user_id)?;

    let deleted = state.pipeline.memory().clear(&user_id).await?;
    info!("Cleared {} rows for user {}", deleted, user_id);
    Ok(Json(DeleteHistoryResponse { user_id, deleted }))
}

/// POST /api/v1/documents
pub async fn ingest_document(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<IngestRequest>,
) -> Result<Json<IngestResponse>> {
    if request.text.trim().is_empty() {
        return Err(ChatError::Validation("text cannot be empty".to_string()));
    }
    let source = if request.source.trim().is_empty() {
        "api".to_string()
    } else {
        request.source
    };

    let chunks = state.pipeline.retriever().ingest_text(&source, &request.text).await?;
    Ok(Json(IngestResponse { source, chunks }))
}

/// POST /api/v1/documents/search
pub async fn search_documents(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    if request.query.trim().is_empty() {
        return Err(ChatError::Validation("query cannot be empty".to_string()));
    }
    let documents = state.pipeline.retriever().fetch(&request.query).await?;
    Ok(Json(SearchResponse { documents }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}
