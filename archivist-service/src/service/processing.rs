//! Main document processing pipeline.
//!
//! Stages run in a fixed order: extract, chunk, embed, index. Each stage
//! attempt is recorded before its side effects happen, so a crashed run
//! leaves a trail the next run can pick up from. Succeeded stages are
//! never re-executed for the same document.

use metrics::{counter, histogram};
use serde_json::json;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunker;
use crate::config::EmbedFailurePolicy;
use crate::db::{Document, DocumentStatus, Stage, StageStatus};
use crate::error::{
    IndexError, ProcessingError, ServiceError, ServiceResult, format_error_chain,
};
use crate::service::ArchivistService;
use crate::storage::extracted_text_key;

impl ArchivistService {
    /// Process a single document (called by the worker).
    ///
    /// Claims the document first; if the claim fails the document is either
    /// already being processed elsewhere or not in a processable state, and
    /// this is a no-op.
    pub(crate) async fn process_document(&self, document: &Document) {
        let doc_id = &document.id;

        let claimed = match self.db.claim_document(doc_id) {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(doc_id = %doc_id, error = %e, "Failed to claim document");
                return;
            }
        };
        if !claimed {
            debug!(doc_id = %doc_id, "Document not claimable, skipping");
            return;
        }

        info!(doc_id = %doc_id, file_name = %document.file_name, "Processing document");
        let cancel_token = self.register_processing_token(doc_id);

        let result = self.run_stages(document, &cancel_token).await;

        match result {
            Ok(()) => {
                if let Err(e) =
                    self.db
                        .transition_document_status(doc_id, DocumentStatus::Processed, None)
                {
                    warn!(doc_id = %doc_id, error = %e, "Failed to mark document processed");
                } else {
                    counter!("archivist_documents_processed_total").increment(1);
                    info!(doc_id = %doc_id, "Document processed successfully");
                }
            }
            Err(ServiceError::Processing(ProcessingError::Cancelled { .. })) => {
                // Completed stage records stay behind; a later reprocess
                // resumes from the first incomplete stage.
                if let Err(e) = self.db.transition_document_status(
                    doc_id,
                    DocumentStatus::Failed,
                    Some("processing cancelled"),
                ) {
                    warn!(doc_id = %doc_id, error = %e, "Failed to mark document cancelled");
                }
                counter!("archivist_documents_cancelled_total").increment(1);
                info!(doc_id = %doc_id, "Document processing cancelled");
            }
            Err(e) => {
                let message = format_error_chain(&e);
                if let Err(e) = self.db.transition_document_status(
                    doc_id,
                    DocumentStatus::Failed,
                    Some(&message),
                ) {
                    warn!(doc_id = %doc_id, error = %e, "Failed to mark document failed");
                }
                counter!("archivist_documents_failed_total").increment(1);
                error!(doc_id = %doc_id, error = %message, "Document processing failed");
            }
        }

        self.unregister_processing_token(doc_id);
    }

    /// Run all pipeline stages in order, skipping any that already succeeded
    async fn run_stages(
        &self,
        document: &Document,
        cancel_token: &CancellationToken,
    ) -> ServiceResult<()> {
        for stage in Stage::ALL {
            self.check_cancellation(&document.id, cancel_token)?;

            if let Some(previous) = self.db.latest_stage_record(&document.id, stage)? {
                match previous.status {
                    StageStatus::Succeeded => {
                        debug!(doc_id = %document.id, stage = %stage.as_str(), "Stage already completed, skipping");
                        continue;
                    }
                    StageStatus::Running | StageStatus::Pending => {
                        // Orphan from a crashed run; this worker holds the
                        // document claim, so the old attempt is dead
                        warn!(
                            doc_id = %document.id,
                            stage = %stage.as_str(),
                            attempt = previous.attempt,
                            "Found orphaned stage attempt, marking failed before retry"
                        );
                        self.db
                            .mark_record_failed(&previous.id, "interrupted by restart")?;
                    }
                    StageStatus::Failed => {}
                }
            }

            let record = self.db.start_stage(&document.id, stage)?;
            let started = Instant::now();
            info!(
                doc_id = %document.id,
                stage = %stage.as_str(),
                attempt = record.attempt,
                "Starting stage"
            );

            match self.execute_stage(document, stage, cancel_token).await {
                Ok(metadata) => {
                    self.db.mark_record_succeeded(&record.id, metadata)?;
                    histogram!(
                        "archivist_stage_duration_seconds",
                        "stage" => stage.as_str()
                    )
                    .record(started.elapsed().as_secs_f64());
                    info!(doc_id = %document.id, stage = %stage.as_str(), "Stage completed");
                }
                Err(e) => {
                    self.db.mark_record_failed(&record.id, &format_error_chain(&e))?;
                    counter!(
                        "archivist_stage_failures_total",
                        "stage" => stage.as_str()
                    )
                    .increment(1);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn execute_stage(
        &self,
        document: &Document,
        stage: Stage,
        cancel_token: &CancellationToken,
    ) -> ServiceResult<Option<serde_json::Value>> {
        match stage {
            Stage::Extract => self.run_extract_stage(document).await,
            Stage::Chunk => self.run_chunk_stage(document),
            Stage::Embed => self.run_embed_stage(document, cancel_token).await,
            Stage::Index => self.run_index_stage(document),
        }
    }

    /// Extract text from the stored blob and persist it as a derived artifact
    async fn run_extract_stage(
        &self,
        document: &Document,
    ) -> ServiceResult<Option<serde_json::Value>> {
        let bytes = self.blobs.get(&document.storage_key)?;

        // PDFium work is CPU-bound and synchronous
        let extractor = self.extractor.clone();
        let extension = document.file_extension.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &extension))
            .await
            .map_err(|e| {
                ServiceError::Processing(ProcessingError::Io(std::io::Error::other(e)))
            })??;

        let text_key = extracted_text_key(&document.owner_id, &document.id);
        self.blobs.put(&text_key, text.as_bytes())?;

        Ok(Some(json!({ "characters": text.chars().count() })))
    }

    /// Split the extracted text into chunk rows
    fn run_chunk_stage(&self, document: &Document) -> ServiceResult<Option<serde_json::Value>> {
        let text_key = extracted_text_key(&document.owner_id, &document.id);
        let bytes = self.blobs.get(&text_key)?;
        let text = String::from_utf8(bytes).map_err(|e| {
            ServiceError::Processing(ProcessingError::TextExtraction {
                source: Box::new(e),
            })
        })?;

        let spans = chunker::chunk(
            &text,
            self.config.pipeline.max_chunk_chars,
            self.config.pipeline.overlap_chars,
        );
        if spans.is_empty() {
            return Err(ServiceError::Processing(ProcessingError::EmptyDocument));
        }

        for span in &spans {
            self.db.upsert_chunk(&document.id, span.index, &span.text)?;
        }
        // A previous attempt may have produced more chunks than this one
        let stale = self.db.delete_chunks_from(&document.id, spans.len())?;

        Ok(Some(json!({ "chunks": spans.len(), "stale_removed": stale })))
    }

    /// Generate embeddings for chunks that do not have one yet
    async fn run_embed_stage(
        &self,
        document: &Document,
        cancel_token: &CancellationToken,
    ) -> ServiceResult<Option<serde_json::Value>> {
        // Fresh attempt retries chunks that failed permanently last time
        self.db.reset_embed_errors(&document.id)?;

        let pending = self.db.get_chunks_without_embeddings(&document.id)?;
        let total_pending = pending.len();
        let batch_size = self.config.pipeline.embed_concurrency.max(1);

        let mut embedded = 0usize;
        let mut failed = 0usize;
        let mut dimension = self.embedder.dimension();

        for batch in pending.chunks(batch_size) {
            // Cancellation only takes effect between batches: every request
            // already issued completes and its vector is persisted below
            self.check_cancellation(&document.id, cancel_token)?;

            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let results = self.embedder.embed_batch(&texts).await;

            // Persist the whole batch before surfacing any fatal error, so a
            // resumed attempt never repeats work that already succeeded
            let mut fatal: Option<ServiceError> = None;
            for (chunk, result) in batch.iter().zip(results) {
                match result {
                    Ok(vector) => {
                        match dimension {
                            Some(expected) if vector.len() != expected => {
                                if fatal.is_none() {
                                    fatal =
                                        Some(ServiceError::Index(IndexError::DimensionMismatch {
                                            expected,
                                            got: vector.len(),
                                        }));
                                }
                                continue;
                            }
                            Some(_) => {}
                            None => dimension = Some(vector.len()),
                        }
                        self.db
                            .set_chunk_embedding(&document.id, chunk.chunk_index, &vector)?;
                        embedded += 1;
                    }
                    // Transient errors arriving here have exhausted their retries
                    Err(e) if e.is_transient() => {
                        if fatal.is_none() {
                            fatal = Some(ServiceError::Embed(e));
                        }
                    }
                    Err(e) => match self.config.pipeline.embed_failure_policy {
                        EmbedFailurePolicy::FailClosed => {
                            if fatal.is_none() {
                                fatal = Some(ServiceError::Embed(e));
                            }
                        }
                        EmbedFailurePolicy::AllowPartial => {
                            warn!(
                                doc_id = %document.id,
                                chunk_index = chunk.chunk_index,
                                error = %e,
                                "Chunk embedding failed permanently, continuing"
                            );
                            counter!("archivist_chunks_embed_failed_total").increment(1);
                            self.db.set_chunk_embed_error(
                                &document.id,
                                chunk.chunk_index,
                                &format_error_chain(&e),
                            )?;
                            failed += 1;
                        }
                    },
                }
            }
            if let Some(e) = fatal {
                return Err(e);
            }
        }

        Ok(Some(json!({
            "embedded": embedded,
            "failed": failed,
            "pending_at_start": total_pending,
        })))
    }

    /// Rebuild the document's vector index entries from its chunk rows
    fn run_index_stage(&self, document: &Document) -> ServiceResult<Option<serde_json::Value>> {
        let chunks = self.db.get_chunks(&document.id)?;
        if chunks.is_empty() {
            return Err(ServiceError::Consistency {
                message: format!("document {} has no chunks to index", document.id),
            });
        }

        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.chunk_index != expected {
                return Err(ServiceError::Consistency {
                    message: format!(
                        "chunk indices not contiguous for document {}: expected {}, found {}",
                        document.id, expected, chunk.chunk_index
                    ),
                });
            }
        }

        // Entries are a rebuildable projection; replace wholesale
        self.index.delete_by_document(&document.id)?;

        let mut indexed = 0usize;
        let mut skipped = 0usize;
        let mut dimension: Option<usize> = None;

        for chunk in &chunks {
            match (&chunk.embedding, &chunk.embed_error) {
                (Some(embedding), _) => {
                    match dimension {
                        Some(expected) if embedding.len() != expected => {
                            return Err(ServiceError::Index(IndexError::DimensionMismatch {
                                expected,
                                got: embedding.len(),
                            }));
                        }
                        Some(_) => {}
                        None => dimension = Some(embedding.len()),
                    }
                    self.index.upsert(
                        &document.id,
                        chunk.chunk_index,
                        &document.owner_id,
                        embedding,
                    )?;
                    indexed += 1;
                }
                (None, Some(_)) => skipped += 1,
                (None, None) => {
                    return Err(ServiceError::Consistency {
                        message: format!(
                            "chunk {} of document {} has neither embedding nor recorded failure",
                            chunk.chunk_index, document.id
                        ),
                    });
                }
            }
        }

        if indexed == 0 {
            return Err(ServiceError::Consistency {
                message: format!("document {} has no embedded chunks to index", document.id),
            });
        }

        Ok(Some(json!({ "indexed": indexed, "skipped": skipped })))
    }
}
