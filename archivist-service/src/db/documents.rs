//! Document CRUD operations and status transitions.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{Document, DocumentStatus};
use crate::error::{DatabaseError, ServiceResult};

const DOCUMENT_COLUMNS: &str = "id, owner_id, file_name, file_extension, file_size, content_type, \
     storage_key, file_hash, status, error, created_at, updated_at";

impl Database {
    /// Insert a new document
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO documents (id, owner_id, file_name, file_extension, file_size, content_type, storage_key, file_hash, status, error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                doc.id,
                doc.owner_id,
                doc.file_name,
                doc.file_extension,
                doc.file_size as i64,
                doc.content_type,
                doc.storage_key,
                doc.file_hash,
                doc.status.as_str(),
                doc.error,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List a user's documents, newest first
    pub fn list_documents(&self, owner_id: &str) -> ServiceResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC",
                DOCUMENT_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![owner_id], Document::from_row)
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }

    /// Delete a document. Processing records, chunk rows, and vector entries
    /// go with it via foreign key cascade.
    pub fn delete_document(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Find a non-failed document with the same content hash for an owner
    pub fn get_document_by_hash(
        &self,
        owner_id: &str,
        file_hash: &str,
    ) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM documents \
                 WHERE owner_id = ?1 AND file_hash = ?2 AND status != 'failed'",
                DOCUMENT_COLUMNS
            ),
            params![owner_id, file_hash],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Move a document to a new status, enforcing the lifecycle state machine.
    ///
    /// The UPDATE's WHERE clause only matches statuses allowed to transition
    /// into `to`, so this doubles as a compare-and-swap: a concurrent caller
    /// that lost the race gets `false` back. Returns whether a row changed.
    pub fn transition_document_status(
        &self,
        document_id: &str,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> ServiceResult<bool> {
        let allowed_from: Vec<&'static str> = [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::Failed,
        ]
        .iter()
        .filter(|from| from.can_transition(to))
        .map(|from| from.as_str())
        .collect();

        let placeholders: Vec<String> = (0..allowed_from.len())
            .map(|i| format!("?{}", i + 4))
            .collect();
        let sql = format!(
            "UPDATE documents SET status = ?1, error = ?2, updated_at = datetime('now') \
             WHERE id = ?3 AND status IN ({})",
            placeholders.join(", ")
        );

        let conn = self.conn.lock().unwrap();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(to.as_str().to_string()),
            Box::new(error.map(|e| e.to_string())),
            Box::new(document_id.to_string()),
        ];
        for from in &allowed_from {
            params_vec.push(Box::new(from.to_string()));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let rows = conn
            .execute(&sql, params_refs.as_slice())
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Claim a document for processing (uploaded -> processing).
    /// Returns false when another worker already holds it or the document
    /// is not queued.
    pub fn claim_document(&self, document_id: &str) -> ServiceResult<bool> {
        self.transition_document_status(document_id, DocumentStatus::Processing, None)
    }

    /// Get the next queued document (oldest first).
    /// Used by the processing worker.
    pub fn get_next_queued_document(&self) -> ServiceResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM documents WHERE status = 'uploaded' ORDER BY created_at ASC LIMIT 1",
                DOCUMENT_COLUMNS
            ),
            [],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Re-queue documents stranded in `processing` by a previous crash.
    /// Called once on startup before workers begin polling; their stage
    /// records keep the work already done, so resumption skips it.
    pub fn requeue_orphaned_documents(&self) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'uploaded', updated_at = datetime('now') \
                 WHERE status = 'processing'",
                [],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }
}
