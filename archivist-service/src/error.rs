use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Embedding error")]
    Embed(#[from] EmbedError),

    #[error("Vector index error")]
    Index(#[from] IndexError),

    #[error("Blob storage error")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Consistency violation: {message}")]
    Consistency { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to extract text")]
    TextExtraction {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("No text content in document")]
    EmptyDocument,

    #[error("Processing cancelled for document {document_id}")]
    Cancelled { document_id: String },

    #[error("Stage {stage} is already running for document {document_id}")]
    StageAlreadyRunning { document_id: String, stage: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// Embedding errors.
///
/// Transient variants are retried with backoff inside the embedder;
/// permanent variants fail the chunk (or stage) immediately.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Connection failed to embedding backend at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Embedding request timed out")]
    Timeout,

    #[error("Embedding backend rate limited the request")]
    RateLimited,

    #[error("Embedding model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Invalid input for embedding: {message}")]
    InvalidInput { message: String },

    #[error("Embedding generation failed (status {status}): {message}")]
    Generation { status: u16, message: String },

    #[error("Invalid response from embedding backend")]
    InvalidResponse {
        #[source]
        source: serde_json::Error,
    },
}

impl EmbedError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedError::Connection { .. } | EmbedError::Timeout | EmbedError::RateLimited => true,
            EmbedError::Generation { status, .. } => *status >= 500,
            EmbedError::ModelNotFound { .. }
            | EmbedError::InvalidInput { .. }
            | EmbedError::InvalidResponse { .. } => false,
        }
    }
}

/// Vector index errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Blob storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Embed(EmbedError::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Embed(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::Database(_) => "database_error",
            ServiceError::Processing(ProcessingError::TextExtraction { .. }) => {
                "text_extraction_error"
            }
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Processing(ProcessingError::EmptyDocument) => "empty_document",
            ServiceError::Processing(ProcessingError::Cancelled { .. }) => "processing_cancelled",
            ServiceError::Processing(ProcessingError::StageAlreadyRunning { .. }) => {
                "stage_already_running"
            }
            ServiceError::Processing(ProcessingError::Io(_)) => "io_error",
            ServiceError::Embed(EmbedError::Connection { .. }) => "embed_connection",
            ServiceError::Embed(EmbedError::Timeout) => "embed_timeout",
            ServiceError::Embed(EmbedError::RateLimited) => "embed_rate_limited",
            ServiceError::Embed(EmbedError::ModelNotFound { .. }) => "embed_model_not_found",
            ServiceError::Embed(_) => "embed_error",
            ServiceError::Index(_) => "index_error",
            ServiceError::Storage(StorageError::NotFound { .. }) => "blob_not_found",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Consistency { .. } => "consistency_error",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Render an error and its source chain as a single line
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_chain_includes_sources() {
        let inner = std::io::Error::other("disk unplugged");
        let err = ProcessingError::Io(inner);
        let chain = format_error_chain(&err);
        assert!(chain.contains("IO error"));
        assert!(chain.contains("disk unplugged"));
    }

    #[test]
    fn test_status_codes() {
        let err = ServiceError::DocumentNotFound {
            document_id: "missing".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = ServiceError::Processing(ProcessingError::FileTooLarge { size: 10, max: 5 });
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let err = ServiceError::Embed(EmbedError::Timeout);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
