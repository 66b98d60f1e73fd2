//! HTTP API for chat, history and documents

pub mod extract;
pub mod handlers;
pub mod models;
pub mod routes;

pub use extract::ApiJson;
pub use handlers::AppState;
pub use models::{error_codes, ApiError};
pub use routes::build_router;
