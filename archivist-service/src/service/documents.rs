//! Document lifecycle operations: status, deletion, cancellation, reprocessing.

use serde::Serialize;
use tracing::{info, warn};

use crate::db::{Document, DocumentStatus, ProcessingRecord};
use crate::error::{ServiceError, ServiceResult};
use crate::service::ArchivistService;
use crate::storage::extracted_text_key;

/// Document plus its full processing history
#[derive(Serialize)]
pub struct DocumentDetails {
    #[serde(flatten)]
    pub document: Document,
    pub stage_records: Vec<ProcessingRecord>,
    pub chunk_count: usize,
}

impl ArchivistService {
    /// Fetch a document or fail with not-found
    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    /// Document with its stage attempt history and chunk count
    pub fn get_document_details(&self, document_id: &str) -> ServiceResult<DocumentDetails> {
        let document = self.get_document(document_id)?;
        let stage_records = self.db.list_stage_records(document_id)?;
        let chunk_count = self.db.count_chunks(document_id)?;

        Ok(DocumentDetails {
            document,
            stage_records,
            chunk_count,
        })
    }

    /// All documents belonging to an owner, newest first
    pub fn list_documents(&self, owner_id: &str) -> ServiceResult<Vec<Document>> {
        self.db.list_documents(owner_id)
    }

    /// Delete a document and everything derived from it.
    ///
    /// In-flight processing is cancelled first. Index entries, blobs, and
    /// database rows (chunks and stage records via cascade) all go.
    pub fn delete_document(&self, document_id: &str) -> ServiceResult<()> {
        let document = self.get_document(document_id)?;

        if self.cancel_processing_token(document_id) {
            info!(doc_id = %document_id, "Cancelled in-flight processing before delete");
        }

        self.index.delete_by_document(document_id)?;

        // Blob removal is best effort; rows are the source of truth
        if let Err(e) = self.blobs.delete(&document.storage_key) {
            warn!(doc_id = %document_id, error = %e, "Failed to delete document blob");
        }
        let text_key = extracted_text_key(&document.owner_id, document_id);
        if let Err(e) = self.blobs.delete(&text_key) {
            warn!(doc_id = %document_id, error = %e, "Failed to delete extracted text blob");
        }

        self.db.delete_document(document_id)?;
        info!(doc_id = %document_id, "Document deleted");

        Ok(())
    }

    /// Request cancellation of in-flight processing.
    /// Returns false when the document is not currently being processed.
    pub fn cancel_processing(&self, document_id: &str) -> ServiceResult<bool> {
        // Ensure the document exists so callers get 404 over a silent false
        self.get_document(document_id)?;
        Ok(self.cancel_processing_token(document_id))
    }

    /// Queue a failed document for another processing run.
    ///
    /// Succeeded stage attempts are kept, so the new run resumes from the
    /// first incomplete stage.
    pub fn reprocess_document(&self, document_id: &str) -> ServiceResult<Document> {
        let document = self.get_document(document_id)?;

        if document.status != DocumentStatus::Failed {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "document {} is {}, only failed documents can be reprocessed",
                    document_id,
                    document.status.as_str()
                ),
            });
        }

        let requeued =
            self.db
                .transition_document_status(document_id, DocumentStatus::Uploaded, None)?;
        if !requeued {
            // Lost a race with another state change
            return Err(ServiceError::InvalidRequest {
                message: format!("document {} changed state, try again", document_id),
            });
        }

        info!(doc_id = %document_id, "Document queued for reprocessing");
        self.get_document(document_id)
    }
}
