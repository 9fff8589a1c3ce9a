//! API Routes
//!
//! This module organizes all HTTP endpoints for the application:
//! - `/api/sessions` - Session lifecycle, credential, uploads and questions
//! - `/api/health` - Health checks
//! - `/` - Single-page UI

pub mod health;
pub mod sessions;
pub mod ui;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
///
/// Uploads may be as large as `MAX_UPLOAD_BYTES`; axum's 2 MB default extractor
/// limit is replaced by a request body limit of that size.
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let max_upload = state.config.data.max_upload_bytes;
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(sessions::router(state.clone()))
        .merge(health::router(state))
        .merge(ui::router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
