//! Document upload handling.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Document, DocumentStatus};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::service::ArchivistService;
use crate::storage::{blob_key, compute_content_hash};

/// Result of an upload request
pub struct UploadOutcome {
    pub document: Document,
    /// True when the bytes matched an existing document for this owner
    pub duplicate: bool,
}

impl ArchivistService {
    /// Accept an uploaded file and queue it for processing.
    ///
    /// Validation and persistence happen synchronously; the pipeline runs
    /// later on the background worker. Returns the queued (or already
    /// existing, for duplicate content) document record.
    pub fn upload_document(
        &self,
        owner_id: &str,
        file_name: &str,
        content_type: Option<String>,
        content: &[u8],
    ) -> ServiceResult<UploadOutcome> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "owner_id is required".to_string(),
            });
        }
        if file_name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "file name is required".to_string(),
            });
        }
        if content.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "uploaded file is empty".to_string(),
            });
        }

        let extension = file_extension(file_name);
        let dotted = format!(".{}", extension);
        let allowed = &self.config.limits.allowed_extensions;
        if extension.is_empty() || !allowed.iter().any(|e| e.eq_ignore_ascii_case(&dotted)) {
            return Err(ServiceError::Processing(ProcessingError::UnsupportedFormat {
                format: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension
                },
            }));
        }

        let size = content.len() as u64;
        let max = self.config.limits.max_document_size_bytes;
        if size > max {
            return Err(ServiceError::Processing(ProcessingError::FileTooLarge {
                size,
                max,
            }));
        }

        let file_hash = compute_content_hash(content);

        // Same bytes from the same owner: hand back the existing document
        if let Some(existing) = self.db.get_document_by_hash(owner_id, &file_hash)? {
            warn!(
                doc_id = %existing.id,
                owner_id = %owner_id,
                "Duplicate upload, returning existing document"
            );
            return Ok(UploadOutcome {
                document: existing,
                duplicate: true,
            });
        }

        self.db.ensure_user(owner_id)?;

        let document_id = Uuid::new_v4().to_string();
        let storage_key = blob_key(owner_id, &document_id, file_name);

        self.blobs.put(&storage_key, content)?;

        let now = Utc::now();
        let document = Document {
            id: document_id,
            owner_id: owner_id.to_string(),
            file_name: file_name.to_string(),
            file_extension: extension,
            file_size: size,
            content_type: content_type
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()),
            storage_key,
            file_hash,
            status: DocumentStatus::Uploaded,
            error: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.db.insert_document(&document) {
            // Do not leave the blob behind if the record failed
            let _ = self.blobs.delete(&document.storage_key);
            return Err(e);
        }

        info!(
            doc_id = %document.id,
            owner_id = %owner_id,
            file_name = %document.file_name,
            size = size,
            "Document uploaded and queued"
        );

        Ok(UploadOutcome {
            document,
            duplicate: false,
        })
    }
}

/// Lowercased extension without the dot, empty if there is none
fn file_extension(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}
