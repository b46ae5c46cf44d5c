//! Main service coordinator.

mod cancellation;
#[cfg(test)]
mod tests;
mod documents;
mod processing;
mod search;
mod upload;
mod workers;

pub use documents::DocumentDetails;
pub use search::SearchHit;

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::db::Database;
use crate::embed::Embedder;
use crate::error::ServiceResult;
use crate::extract::TextExtractor;
use crate::index::VectorIndex;
use crate::storage::BlobStore;

/// Document pipeline coordinator.
///
/// Owns the database, blob store, and the pluggable stage backends. One
/// instance is shared across the HTTP layer and the background worker.
pub struct ArchivistService {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    /// Cancellation tokens for documents currently being processed
    processing_cancellation_tokens: DashMap<String, CancellationToken>,
}

impl ArchivistService {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> ServiceResult<Self> {
        info!("Initializing archivist service");

        Ok(Self {
            config,
            db,
            blobs,
            extractor,
            embedder,
            index,
            processing_cancellation_tokens: DashMap::new(),
        })
    }
}
