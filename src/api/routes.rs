//! Route configuration

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

/// Build the application router
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/chat", post(handlers::chat))
        .route("/api/v1/chat/:user_id", delete(handlers::delete_history))
        .route("/api/v1/chat/:user_id/history", get(handlers::get_history))
        .route("/api/v1/documents", post(handlers::ingest_document))
        .route("/api/v1/documents/search", post(handlers::search_documents))
        .layer(RequestBodyLimitLayer::new(max_body_bytes));

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    public_routes
        .merge(api_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
