//! # API REST
//!
//! REST API implementation for Filegate.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI documentation (served as JSON)
//! - REST-specific concerns (multipart parsing, JSON serialization, CORS, URL construction)
//!
//! All storage semantics live in `filegate-core`; handlers run its blocking operations on the
//! tokio blocking pool.

#![warn(rust_2018_idioms)]

mod error;
mod handlers;
mod urls;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use filegate_core::StorageService;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

pub use error::{ApiError, ErrorBody};
pub use handlers::{
    DeleteRes, FileEntryRes, HealthRes, ListFilesRes, PathReq, TokenRes, UploadRes,
    FILE_PATH_HEADER,
};
pub use urls::{download_url, encode_path, view_url};

/// Application state shared across REST API handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StorageService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::upload,
        handlers::view_file,
        handlers::download_file,
        handlers::list_root,
        handlers::list_files,
        handlers::get_token,
        handlers::delete_path,
    ),
    components(schemas(
        HealthRes,
        UploadRes,
        FileEntryRes,
        ListFilesRes,
        PathReq,
        TokenRes,
        DeleteRes,
        ErrorBody,
    ))
)]
pub struct ApiDoc;

/// Builds the Filegate router.
///
/// The request body limit is taken from the service's configuration.
pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.service.config().max_body_bytes();

    Router::new()
        .route("/health", get(handlers::health))
        .route("/upload", post(handlers::upload))
        .route("/storage/*path", get(handlers::view_file))
        .route("/download/*path", post(handlers::download_file))
        .route("/listFiles", post(handlers::list_root))
        .route("/listFiles/*path", post(handlers::list_files))
        .route("/getToken", post(handlers::get_token))
        .route("/delete", post(handlers::delete_path))
        .route("/api-docs/openapi.json", get(handlers::openapi_json))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
