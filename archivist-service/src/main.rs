use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

mod api;
mod chunker;
mod config;
mod db;
mod embed;
mod error;
mod extract;
mod index;
mod service;
mod storage;

use crate::config::AppConfig;
use crate::db::Database;
use crate::embed::OllamaEmbedder;
use crate::extract::DocumentExtractor;
use crate::index::SqliteVectorIndex;
use crate::service::ArchivistService;
use crate::storage::FsBlobStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!(
        "Starting archivist service v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration from config file and ARCHIVIST__ env overrides
    let app_config = Arc::new(AppConfig::load()?);
    info!(
        host = %app_config.server.host,
        port = app_config.server.port,
        "Configuration loaded"
    );

    // Ensure data directory exists
    std::fs::create_dir_all(&app_config.storage.data_dir)?;

    // Initialize database
    let db_path = app_config.storage.data_dir.join("archivist.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Install the Prometheus recorder before any metrics are emitted
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    // Assemble the pipeline backends
    let blobs = Arc::new(FsBlobStore::new(app_config.storage.data_dir.join("blobs"))?);
    let extractor = Arc::new(DocumentExtractor::new());
    let embedder = Arc::new(OllamaEmbedder::new(&app_config.embeddings)?);
    let index = Arc::new(SqliteVectorIndex::new(db.clone()));

    let service = Arc::new(ArchivistService::new(
        app_config.clone(),
        db.clone(),
        blobs,
        extractor,
        embedder,
        index,
    )?);

    // Documents stranded mid-processing by a crash go back into the queue;
    // their completed stage records make the retry skip finished work
    match db.requeue_orphaned_documents() {
        Ok(count) if count > 0 => info!(count, "Re-queued documents orphaned by restart"),
        Err(e) => tracing::warn!(error = %e, "Failed to re-queue orphaned documents"),
        _ => {}
    }

    // Build the router
    let app = api::router(service.clone(), metrics_handle);

    // Start document processing worker (picks up queued documents)
    ArchivistService::start_processing_worker(service.clone());

    // Start the server
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("archivist_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
