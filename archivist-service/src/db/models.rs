//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Uploaded and queued, waiting for a worker
    Uploaded,
    /// A worker has claimed the document and is running pipeline stages
    Processing,
    /// All pipeline stages completed
    Processed,
    /// A stage failed; see the document's error field
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "uploaded" => DocumentStatus::Uploaded,
            "processing" => DocumentStatus::Processing,
            "processed" => DocumentStatus::Processed,
            _ => DocumentStatus::Failed,
        }
    }

    /// Valid lifecycle transitions. Anything not listed here is rejected
    /// at the database layer.
    pub fn can_transition(&self, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, to),
            (Uploaded, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Uploaded)
                | (Failed, Uploaded)
        )
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Chunk,
    Embed,
    Index,
}

impl Stage {
    /// All stages in the order the pipeline runs them
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Chunk, Stage::Embed, Stage::Index];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Index => "index",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "extract" => Stage::Extract,
            "chunk" => Stage::Chunk,
            "embed" => Stage::Embed,
            _ => Stage::Index,
        }
    }
}

/// Status of a single stage attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Record created, side effects not started yet
    Pending,
    /// Stage side effects in flight
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => StageStatus::Pending,
            "running" => StageStatus::Running,
            "succeeded" => StageStatus::Succeeded,
            _ => StageStatus::Failed,
        }
    }

}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: u64,
    pub content_type: String,
    pub storage_key: String,
    pub file_hash: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let file_size: i64 = row.get(4)?;
        let status_str: String = row.get(8)?;
        let created_at_str: String = row.get(10)?;
        let updated_at_str: String = row.get(11)?;

        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            file_name: row.get(2)?,
            file_extension: row.get(3)?,
            file_size: file_size as u64,
            content_type: row.get(5)?,
            storage_key: row.get(6)?,
            file_hash: row.get(7)?,
            status: DocumentStatus::from_str(&status_str),
            error: row.get(9)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

/// One attempt at one pipeline stage for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub id: String,
    pub document_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ProcessingRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let stage_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let attempt: i64 = row.get(4)?;
        let started_at_str: Option<String> = row.get(5)?;
        let finished_at_str: Option<String> = row.get(6)?;
        let metadata_str: Option<String> = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            stage: Stage::from_str(&stage_str),
            status: StageStatus::from_str(&status_str),
            attempt: attempt as u32,
            started_at: started_at_str.as_deref().map(parse_timestamp),
            finished_at: finished_at_str.as_deref().map(parse_timestamp),
            error: row.get(7)?,
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

/// Chunk record with optional embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// NULL until the embed stage stores a vector for this chunk
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    /// Set when this chunk permanently failed embedding under the
    /// allow_partial policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let chunk_index: i64 = row.get(2)?;
        let embedding_bytes: Option<Vec<u8>> = row.get(4)?;
        let created_at_str: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            chunk_index: chunk_index as usize,
            content: row.get(3)?,
            embedding: embedding_bytes.map(|bytes| decode_embedding(&bytes)),
            embed_error: row.get(5)?,
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

/// Decode a little-endian f32 BLOB into a vector
pub(crate) fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Encode a vector as a little-endian f32 BLOB
pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
