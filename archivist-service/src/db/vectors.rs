//! Vector entry operations backing the SQLite vector index.
//!
//! Entries are a derived projection of the embeddings table; the index
//! stage rebuilds a document's entries wholesale.

use rusqlite::params;

use super::Database;
use super::models::{decode_embedding, encode_embedding};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert or replace a vector entry
    pub fn upsert_vector_entry(
        &self,
        document_id: &str,
        chunk_index: usize,
        owner_id: &str,
        embedding: &[f32],
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO vector_entries (document_id, chunk_index, owner_id, embedding)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                document_id,
                chunk_index as i64,
                owner_id,
                encode_embedding(embedding)
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Remove all vector entries for a document
    pub fn delete_vector_entries(&self, document_id: &str) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "DELETE FROM vector_entries WHERE document_id = ?1",
                params![document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Brute-force cosine similarity over vector entries, best first.
    /// Returns (document_id, chunk_index, score) tuples.
    pub fn query_vector_entries(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        owner_filter: Option<&str>,
    ) -> ServiceResult<Vec<(String, usize, f32)>> {
        let conn = self.conn.lock().unwrap();

        let mut sql =
            String::from("SELECT document_id, chunk_index, embedding FROM vector_entries");
        if owner_filter.is_some() {
            sql.push_str(" WHERE owner_id = ?1");
        }

        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;

        let map_row = |row: &rusqlite::Row<'_>| -> Result<(String, i64, Vec<u8>), rusqlite::Error> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        };

        let rows: Vec<(String, i64, Vec<u8>)> = if let Some(owner) = owner_filter {
            stmt.query_map(params![owner], map_row)
                .map_err(DatabaseError::Query)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt.query_map([], map_row)
                .map_err(DatabaseError::Query)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut results: Vec<(String, usize, f32)> = rows
            .into_iter()
            .map(|(document_id, chunk_index, embedding_bytes)| {
                let embedding = decode_embedding(&embedding_bytes);
                let score = cosine_similarity(query_embedding, &embedding);
                (document_id, chunk_index as usize, score)
            })
            .collect();

        // Sort by similarity (descending)
        results.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }
}

/// Calculate cosine similarity between two vectors
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
