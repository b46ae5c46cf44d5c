//! Background worker for document processing.

use std::sync::Arc;

use tracing::{error, info};

use crate::service::ArchivistService;

impl ArchivistService {
    /// Start the document processing worker.
    /// This should be called once on server startup.
    pub fn start_processing_worker(service: Arc<ArchivistService>) {
        tokio::spawn(async move {
            info!("Document processing worker started");
            loop {
                // Check for queued documents
                match service.db.get_next_queued_document() {
                    Ok(Some(doc)) => {
                        info!(doc_id = %doc.id, file_name = %doc.file_name, "Picked up queued document");
                        service.process_document(&doc).await;
                    }
                    Ok(None) => {
                        // Nothing queued, sleep before checking again
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to check for queued documents");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }
}
