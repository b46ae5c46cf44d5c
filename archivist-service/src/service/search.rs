//! Semantic search over indexed chunks.

use serde::Serialize;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::service::ArchivistService;

/// A search result with its chunk text hydrated from the database
#[derive(Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
}

impl ArchivistService {
    /// Embed the query and return the owner's closest chunks, best first.
    ///
    /// Results never cross owner boundaries: the index is queried with the
    /// owner filter applied, not filtered afterwards.
    pub async fn search(
        &self,
        owner_id: &str,
        query: &str,
        top_k: usize,
    ) -> ServiceResult<Vec<SearchHit>> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "owner_id is required".to_string(),
            });
        }
        if query.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "query must not be empty".to_string(),
            });
        }

        debug!(owner_id = %owner_id, top_k, "Searching documents");

        let query_embedding = self.embedder.embed(query).await?;
        let raw_hits = self
            .index
            .query(&query_embedding, top_k, Some(owner_id))?;

        let mut hits = Vec::with_capacity(raw_hits.len());
        for hit in raw_hits {
            // Entries can outlive their chunk briefly during deletion;
            // skip rather than fail the whole search
            let Some(chunk) = self.db.get_chunk(&hit.document_id, hit.chunk_index)? else {
                continue;
            };
            let Some(document) = self.db.get_document(&hit.document_id)? else {
                continue;
            };
            hits.push(SearchHit {
                document_id: hit.document_id,
                file_name: document.file_name,
                chunk_index: hit.chunk_index,
                content: chunk.content,
                score: hit.score,
            });
        }

        Ok(hits)
    }
}
