//! Chunk row operations on the embeddings table.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::Database;
use super::models::{ChunkRecord, encode_embedding};
use crate::error::{DatabaseError, ServiceResult};

const CHUNK_COLUMNS: &str =
    "id, document_id, chunk_index, content, embedding, embed_error, created_at";

impl Database {
    /// Insert or update a chunk row, keyed by (document, index).
    ///
    /// An existing embedding survives the upsert only when the content is
    /// unchanged; re-chunking with different text invalidates it.
    pub fn upsert_chunk(
        &self,
        document_id: &str,
        chunk_index: usize,
        content: &str,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO embeddings (id, document_id, chunk_index, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                content = excluded.content,
                embedding = CASE WHEN embeddings.content = excluded.content
                    THEN embeddings.embedding ELSE NULL END,
                embed_error = CASE WHEN embeddings.content = excluded.content
                    THEN embeddings.embed_error ELSE NULL END
            "#,
            params![
                Uuid::new_v4().to_string(),
                document_id,
                chunk_index as i64,
                content,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Drop chunk rows at or beyond an index. Used after re-chunking
    /// produces fewer chunks than a previous attempt.
    pub fn delete_chunks_from(&self, document_id: &str, from_index: usize) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "DELETE FROM embeddings WHERE document_id = ?1 AND chunk_index >= ?2",
                params![document_id, from_index as i64],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// All chunk rows for a document, in index order
    pub fn get_chunks(&self, document_id: &str) -> ServiceResult<Vec<ChunkRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM embeddings WHERE document_id = ?1 ORDER BY chunk_index",
                CHUNK_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![document_id], ChunkRecord::from_row)
            .map_err(DatabaseError::Query)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(chunks)
    }

    /// A single chunk row, if present
    pub fn get_chunk(
        &self,
        document_id: &str,
        chunk_index: usize,
    ) -> ServiceResult<Option<ChunkRecord>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM embeddings WHERE document_id = ?1 AND chunk_index = ?2",
                CHUNK_COLUMNS
            ),
            params![document_id, chunk_index as i64],
            ChunkRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Chunks still waiting for an embedding.
    /// Used for resumable embed stage attempts.
    pub fn get_chunks_without_embeddings(
        &self,
        document_id: &str,
    ) -> ServiceResult<Vec<ChunkRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM embeddings \
                 WHERE document_id = ?1 AND embedding IS NULL AND embed_error IS NULL \
                 ORDER BY chunk_index",
                CHUNK_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![document_id], ChunkRecord::from_row)
            .map_err(DatabaseError::Query)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(chunks)
    }

    /// Clear recorded per-chunk failures so a fresh embed attempt retries them
    pub fn reset_embed_errors(&self, document_id: &str) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE embeddings SET embed_error = NULL \
                 WHERE document_id = ?1 AND embedding IS NULL AND embed_error IS NOT NULL",
                params![document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Store a chunk's embedding vector
    pub fn set_chunk_embedding(
        &self,
        document_id: &str,
        chunk_index: usize,
        embedding: &[f32],
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE embeddings SET embedding = ?1, embed_error = NULL \
             WHERE document_id = ?2 AND chunk_index = ?3",
            params![
                encode_embedding(embedding),
                document_id,
                chunk_index as i64
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Record a permanent per-chunk embedding failure (allow_partial policy)
    pub fn set_chunk_embed_error(
        &self,
        document_id: &str,
        chunk_index: usize,
        error: &str,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE embeddings SET embed_error = ?1 \
             WHERE document_id = ?2 AND chunk_index = ?3",
            params![error, document_id, chunk_index as i64],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Total chunk rows for a document
    pub fn count_chunks(&self, document_id: &str) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM embeddings WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }
}
