//! Processing record operations.
//!
//! A processing record is the write-ahead trail of the pipeline: one row per
//! (document, stage, attempt). The partial unique index on running records
//! is what keeps concurrent workers from doubling up on a stage.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::Database;
use super::models::{ProcessingRecord, Stage, StageStatus};
use crate::error::{DatabaseError, ProcessingError, ServiceError, ServiceResult};

const RECORD_COLUMNS: &str =
    "id, document_id, stage, status, attempt, started_at, finished_at, error, metadata";

impl Database {
    /// Create the record for a new stage attempt and move it to running.
    ///
    /// Written before any of the stage's side effects. If another running
    /// record for the same (document, stage) exists, the unique index
    /// rejects the claim and this returns `StageAlreadyRunning`.
    pub fn start_stage(&self, document_id: &str, stage: Stage) -> ServiceResult<ProcessingRecord> {
        let conn = self.conn.lock().unwrap();

        let attempt: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM processing_records WHERE document_id = ?1 AND stage = ?2",
                params![document_id, stage.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(DatabaseError::Query)?
            + 1;

        let record_id = Uuid::new_v4().to_string();
        conn.execute(
            r#"
            INSERT INTO processing_records (id, document_id, stage, status, attempt)
            VALUES (?1, ?2, ?3, 'pending', ?4)
            "#,
            params![record_id, document_id, stage.as_str(), attempt],
        )
        .map_err(DatabaseError::Query)?;

        let started_at = Utc::now();
        let result = conn.execute(
            "UPDATE processing_records SET status = 'running', started_at = ?1 WHERE id = ?2",
            params![started_at.to_rfc3339(), record_id],
        );

        match result {
            Ok(_) => Ok(ProcessingRecord {
                id: record_id,
                document_id: document_id.to_string(),
                stage,
                status: StageStatus::Running,
                attempt: attempt as u32,
                started_at: Some(started_at),
                finished_at: None,
                error: None,
                metadata: None,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Lost the claim race; drop our pending row
                let _ = conn.execute(
                    "DELETE FROM processing_records WHERE id = ?1",
                    params![record_id],
                );
                Err(ServiceError::Processing(
                    ProcessingError::StageAlreadyRunning {
                        document_id: document_id.to_string(),
                        stage: stage.as_str().to_string(),
                    },
                ))
            }
            Err(e) => Err(ServiceError::Database(DatabaseError::Query(e))),
        }
    }

    /// Mark a stage attempt as succeeded
    pub fn mark_record_succeeded(
        &self,
        record_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        let metadata_json = metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        conn.execute(
            "UPDATE processing_records SET status = 'succeeded', finished_at = ?1, metadata = ?2 \
             WHERE id = ?3",
            params![Utc::now().to_rfc3339(), metadata_json, record_id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Mark a stage attempt as failed with an error message
    pub fn mark_record_failed(&self, record_id: &str, error: &str) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE processing_records SET status = 'failed', finished_at = ?1, error = ?2 \
             WHERE id = ?3",
            params![Utc::now().to_rfc3339(), error, record_id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Latest attempt for a (document, stage), if any
    pub fn latest_stage_record(
        &self,
        document_id: &str,
        stage: Stage,
    ) -> ServiceResult<Option<ProcessingRecord>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM processing_records \
                 WHERE document_id = ?1 AND stage = ?2 ORDER BY attempt DESC LIMIT 1",
                RECORD_COLUMNS
            ),
            params![document_id, stage.as_str()],
            ProcessingRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// All stage attempts for a document, in execution order
    pub fn list_stage_records(&self, document_id: &str) -> ServiceResult<Vec<ProcessingRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM processing_records WHERE document_id = ?1 \
                 ORDER BY CASE stage \
                    WHEN 'extract' THEN 0 WHEN 'chunk' THEN 1 \
                    WHEN 'embed' THEN 2 ELSE 3 END, attempt ASC",
                RECORD_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![document_id], ProcessingRecord::from_row)
            .map_err(DatabaseError::Query)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(records)
    }
}
