use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use filegate_core::config::{
    allowed_media_types_from_env_value, index_path_from_env_value, max_body_bytes_from_env_value,
    storage_root_from_env_value,
};
use filegate_core::constants::{
    DEFAULT_BIND_ADDR, ENV_ADDR, ENV_ALLOWED_MEDIA_TYPES, ENV_INDEX_PATH, ENV_MAX_BODY_BYTES,
    ENV_PUBLIC_BASE_URL, ENV_STORAGE_ROOT,
};
use filegate_core::{SqliteTokenIndex, StorageConfig, StorageService};

/// Main entry point for the Filegate server
///
/// Resolves configuration from the environment (and `.env`, if present), opens the token index
/// and serves the REST API until interrupted.
///
/// # Environment Variables
/// - `FILEGATE_ADDR`: server address (default: "0.0.0.0:4000")
/// - `FILEGATE_STORAGE_ROOT`: directory holding uploaded files, created if missing (default: "uploads")
/// - `FILEGATE_INDEX_PATH`: SQLite token index (default: "filegate.sqlite3")
/// - `FILEGATE_MAX_BODY_BYTES`: request body limit (default: 500 MiB)
/// - `FILEGATE_PUBLIC_BASE_URL`: origin prepended to view/download URLs (default: none)
/// - `FILEGATE_ALLOWED_MEDIA_TYPES`: comma-separated allow-list override
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or the index cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filegate_run=info".parse()?)
                .add_directive("filegate_core=info".parse()?)
                .add_directive("filegate_files=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = std::env::var(ENV_ADDR)
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.into())
        .parse()?;

    let storage_root = storage_root_from_env_value(std::env::var(ENV_STORAGE_ROOT).ok());
    std::fs::create_dir_all(&storage_root)?;

    let cfg = StorageConfig::new(
        storage_root,
        index_path_from_env_value(std::env::var(ENV_INDEX_PATH).ok()),
        allowed_media_types_from_env_value(std::env::var(ENV_ALLOWED_MEDIA_TYPES).ok()),
        max_body_bytes_from_env_value(std::env::var(ENV_MAX_BODY_BYTES).ok())?,
        std::env::var(ENV_PUBLIC_BASE_URL).unwrap_or_default(),
    )?;

    let index = SqliteTokenIndex::open(cfg.index_path())?;

    tracing::info!(
        "++ Storage root {}, token index {}",
        cfg.storage_root().display(),
        cfg.index_path().display()
    );

    let service = StorageService::new(Arc::new(cfg), Arc::new(index))?;
    let app = router(AppState {
        service: Arc::new(service),
    });

    tracing::info!("++ Starting Filegate REST on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("-- Shutting down");
}
