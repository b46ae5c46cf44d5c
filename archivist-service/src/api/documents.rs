//! Document API endpoints.
//!
//! Handlers for upload, listing, status, deletion, cancellation, and
//! reprocessing.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Document;
use crate::error::ServiceError;
use crate::service::DocumentDetails;

use super::AppState;

/// List documents query parameters
#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub owner_id: String,
}

/// Response for upload operations
#[derive(Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub document: Document,
    pub duplicate: bool,
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Response for cancellation requests
#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub message: String,
}

/// List all documents belonging to an owner
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    let documents = state.service.list_documents(&params.owner_id)?;
    Ok(Json(documents))
}

/// Upload a new document
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServiceError> {
    let mut file_data: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut owner_id: Option<String> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::InvalidRequest {
                        message: e.to_string(),
                    })?;
                file_data = Some((data.to_vec(), filename, content_type));
            }
            "owner_id" => {
                owner_id = Some(field.text().await.map_err(|e| {
                    ServiceError::InvalidRequest {
                        message: e.to_string(),
                    }
                })?);
            }
            _ => {}
        }
    }

    let (data, filename, content_type) =
        file_data.ok_or_else(|| ServiceError::InvalidRequest {
            message: "No file provided".to_string(),
        })?;
    let owner_id = owner_id.ok_or_else(|| ServiceError::InvalidRequest {
        message: "No owner_id provided".to_string(),
    })?;

    let outcome = state
        .service
        .upload_document(&owner_id, &filename, content_type, &data)?;

    Ok(Json(UploadResponse {
        document: outcome.document,
        duplicate: outcome.duplicate,
    }))
}

/// Get a document with its processing history
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetails>, ServiceError> {
    let details = state.service.get_document_details(&id)?;
    Ok(Json(details))
}

/// Delete a document and all derived data
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    state.service.delete_document(&id)?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Document {} deleted", id),
    }))
}

/// Cancel in-flight processing for a document
pub async fn cancel_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ServiceError> {
    let cancelled = state.service.cancel_processing(&id)?;
    let message = if cancelled {
        format!("Cancellation requested for document {}", id)
    } else {
        format!("Document {} is not being processed", id)
    };
    Ok(Json(CancelResponse { cancelled, message }))
}

/// Queue a failed document for reprocessing
pub async fn reprocess_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ServiceError> {
    let document = state.service.reprocess_document(&id)?;
    Ok(Json(document))
}
