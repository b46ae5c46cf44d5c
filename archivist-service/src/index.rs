//! Vector index over chunk embeddings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::db::vectors::cosine_similarity;
use crate::error::ServiceResult;

/// A single search hit from the index
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub document_id: String,
    pub chunk_index: usize,
    pub score: f32,
}

/// Queryable store of (document, chunk) embedding vectors.
///
/// The index is a derived projection: the embeddings table is the source of
/// truth and a document's entries can be rebuilt from it at any time.
pub trait VectorIndex: Send + Sync {
    fn upsert(
        &self,
        document_id: &str,
        chunk_index: usize,
        owner_id: &str,
        vector: &[f32],
    ) -> ServiceResult<()>;

    /// Drop every entry belonging to a document
    fn delete_by_document(&self, document_id: &str) -> ServiceResult<usize>;

    /// Nearest entries by cosine similarity, best first.
    /// With an owner filter, only that owner's entries are candidates.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        owner_filter: Option<&str>,
    ) -> ServiceResult<Vec<IndexHit>>;
}

/// Index stored in the service database
pub struct SqliteVectorIndex {
    db: Arc<Database>,
}

impl SqliteVectorIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(
        &self,
        document_id: &str,
        chunk_index: usize,
        owner_id: &str,
        vector: &[f32],
    ) -> ServiceResult<()> {
        self.db
            .upsert_vector_entry(document_id, chunk_index, owner_id, vector)
    }

    fn delete_by_document(&self, document_id: &str) -> ServiceResult<usize> {
        self.db.delete_vector_entries(document_id)
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        owner_filter: Option<&str>,
    ) -> ServiceResult<Vec<IndexHit>> {
        let hits = self
            .db
            .query_vector_entries(vector, top_k, owner_filter)?
            .into_iter()
            .map(|(document_id, chunk_index, score)| IndexHit {
                document_id,
                chunk_index,
                score,
            })
            .collect();

        Ok(hits)
    }
}

/// In-memory index for tests
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: Mutex<HashMap<(String, usize), (String, Vec<f32>)>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn upsert(
        &self,
        document_id: &str,
        chunk_index: usize,
        owner_id: &str,
        vector: &[f32],
    ) -> ServiceResult<()> {
        self.entries.lock().unwrap().insert(
            (document_id.to_string(), chunk_index),
            (owner_id.to_string(), vector.to_vec()),
        );
        Ok(())
    }

    fn delete_by_document(&self, document_id: &str) -> ServiceResult<usize> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(doc, _), _| doc != document_id);
        Ok(before - entries.len())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        owner_filter: Option<&str>,
    ) -> ServiceResult<Vec<IndexHit>> {
        let entries = self.entries.lock().unwrap();

        let mut hits: Vec<IndexHit> = entries
            .iter()
            .filter(|(_, (owner, _))| owner_filter.is_none_or(|f| f == owner))
            .map(|((document_id, chunk_index), (_, embedding))| IndexHit {
                document_id: document_id.clone(),
                chunk_index: *chunk_index,
                score: cosine_similarity(vector, embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_index_owner_filter() {
        let index = MemoryVectorIndex::new();
        index.upsert("doc-a", 0, "alice", &[1.0, 0.0]).unwrap();
        index.upsert("doc-b", 0, "bob", &[1.0, 0.0]).unwrap();

        let hits = index.query(&[1.0, 0.0], 10, Some("alice")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "doc-a");

        let hits = index.query(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_memory_index_delete_by_document() {
        let index = MemoryVectorIndex::new();
        index.upsert("doc-a", 0, "alice", &[1.0, 0.0]).unwrap();
        index.upsert("doc-a", 1, "alice", &[0.0, 1.0]).unwrap();
        index.upsert("doc-b", 0, "alice", &[1.0, 1.0]).unwrap();

        assert_eq!(index.delete_by_document("doc-a").unwrap(), 2);
        assert_eq!(index.len(), 1);
        let hits = index.query(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits[0].document_id, "doc-b");
    }

    #[test]
    fn test_memory_index_top_k_ordering() {
        let index = MemoryVectorIndex::new();
        index.upsert("doc", 0, "alice", &[1.0, 0.0]).unwrap();
        index.upsert("doc", 1, "alice", &[0.8, 0.2]).unwrap();
        index.upsert("doc", 2, "alice", &[0.0, 1.0]).unwrap();

        let hits = index.query(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 0);
        assert_eq!(hits[1].chunk_index, 1);
        assert!(hits[0].score >= hits[1].score);
    }
}
