//! End-to-end pipeline tests against in-memory backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{AppConfig, EmbedFailurePolicy};
use crate::db::{Database, DocumentStatus, Stage, StageStatus};
use crate::embed::Embedder;
use crate::error::{EmbedError, ProcessingError, ServiceError};
use crate::extract::DocumentExtractor;
use crate::index::MemoryVectorIndex;
use crate::service::ArchivistService;
use crate::storage::MemoryBlobStore;

/// Deterministic embedder: vectors are a pure function of the text.
/// Texts containing a configured marker fail with a permanent error, and
/// an optional per-request delay makes in-flight cancellation testable.
struct StaticEmbedder {
    fail_markers: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl StaticEmbedder {
    fn new(fail_markers: &[&str]) -> Self {
        Self {
            fail_markers: Mutex::new(fail_markers.iter().map(|s| s.to_string()).collect()),
            delay: None,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            fail_markers: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    fn clear_failures(&self) {
        self.fail_markers.lock().unwrap().clear();
    }
}

fn embedding_for(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 8];
    for (i, b) in text.bytes().enumerate() {
        v[i % 8] += b as f32;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_markers
            .lock()
            .unwrap()
            .iter()
            .any(|marker| text.contains(marker));
        if failing {
            return Err(EmbedError::InvalidInput {
                message: "marked as unembeddable".to_string(),
            });
        }
        Ok(embedding_for(text))
    }

    fn dimension(&self) -> Option<usize> {
        Some(8)
    }
}

fn test_config() -> AppConfig {
    let mut config: AppConfig = ::config::Config::builder()
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();
    config.pipeline.max_chunk_chars = 100;
    config.pipeline.overlap_chars = 20;
    config.pipeline.embed_concurrency = 1;
    config
}

struct Harness {
    service: Arc<ArchivistService>,
    embedder: Arc<StaticEmbedder>,
    index: Arc<MemoryVectorIndex>,
}

fn harness_with(config: AppConfig, embedder: StaticEmbedder) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let embedder = Arc::new(embedder);
    let index = Arc::new(MemoryVectorIndex::new());

    let service = Arc::new(
        ArchivistService::new(
            Arc::new(config),
            db,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(DocumentExtractor::new()),
            embedder.clone(),
            index.clone(),
        )
        .unwrap(),
    );

    Harness {
        service,
        embedder,
        index,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), StaticEmbedder::new(&[]))
}

/// Five paragraphs sized so each lands in its own chunk with the test
/// chunking settings (max 100, overlap 20)
fn five_paragraph_text(poison_paragraph: Option<usize>) -> String {
    (0..5)
        .map(|i| {
            let marker = if poison_paragraph == Some(i) {
                "POISON "
            } else {
                "filler "
            };
            format!(
                "Paragraph {} {}starts here and continues with quite a few words.",
                i, marker
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn upload_and_process(h: &Harness, owner: &str, name: &str, content: &str) -> String {
    let outcome = h
        .service
        .upload_document(owner, name, None, content.as_bytes())
        .unwrap();
    assert!(!outcome.duplicate);
    let doc = outcome.document;
    h.service.process_document(&doc).await;
    doc.id
}

#[tokio::test]
async fn test_full_pipeline_happy_path() {
    let h = harness();
    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(None)).await;

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Processed);
    assert!(doc.error.is_none());

    // One succeeded attempt per stage
    let records = h.service.db.list_stage_records(&doc_id).unwrap();
    assert_eq!(records.len(), 4);
    let stages: Vec<Stage> = records.iter().map(|r| r.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    for record in &records {
        assert_eq!(record.status, StageStatus::Succeeded);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
    }

    // Chunks are contiguous and all embedded
    let chunks = h.service.db.get_chunks(&doc_id).unwrap();
    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert!(chunk.embedding.is_some());
        assert!(chunk.embed_error.is_none());
    }

    assert_eq!(h.index.len(), chunks.len());

    // The document is searchable by its own content
    let hits = h
        .service
        .search("alice", "Paragraph 2 filler starts here", 3)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_id, doc_id);
    assert_eq!(hits[0].file_name, "notes.txt");
}

#[tokio::test]
async fn test_processed_document_is_not_reprocessed() {
    let h = harness();
    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(None)).await;

    let records_before = h.service.db.list_stage_records(&doc_id).unwrap().len();

    // A second pass cannot claim a processed document
    let doc = h.service.get_document(&doc_id).unwrap();
    h.service.process_document(&doc).await;

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Processed);
    assert_eq!(
        h.service.db.list_stage_records(&doc_id).unwrap().len(),
        records_before
    );
}

#[tokio::test]
async fn test_duplicate_upload_returns_existing_document() {
    let h = harness();
    let content = five_paragraph_text(None);

    let first = h
        .service
        .upload_document("alice", "notes.txt", None, content.as_bytes())
        .unwrap();
    let second = h
        .service
        .upload_document("alice", "renamed.txt", None, content.as_bytes())
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.document.id, second.document.id);

    // A different owner uploading the same bytes gets their own document
    let other = h
        .service
        .upload_document("bob", "notes.txt", None, content.as_bytes())
        .unwrap();
    assert!(!other.duplicate);
    assert_ne!(other.document.id, first.document.id);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_extension() {
    let h = harness();
    let result = h
        .service
        .upload_document("alice", "virus.exe", None, b"MZ...");
    assert!(matches!(
        result,
        Err(ServiceError::Processing(
            ProcessingError::UnsupportedFormat { .. }
        ))
    ));
}

#[tokio::test]
async fn test_word_documents_accepted_but_fail_at_extract() {
    // .docx is in the default allow-list even though no extractor backend
    // handles it yet; the failure surfaces at the extract stage
    let h = harness();
    let outcome = h
        .service
        .upload_document("alice", "minutes.docx", None, b"PK\x03\x04fake zip")
        .unwrap();
    let doc = outcome.document;

    h.service.process_document(&doc).await;

    let doc = h.service.get_document(&doc.id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error.as_deref().unwrap().contains("docx"));

    let records = h.service.db.list_stage_records(&doc.id).unwrap();
    let extract = records.iter().find(|r| r.stage == Stage::Extract).unwrap();
    assert_eq!(extract.status, StageStatus::Failed);
    assert!(!records.iter().any(|r| r.stage == Stage::Chunk));
}

#[tokio::test]
async fn test_upload_rejects_oversized_file() {
    let mut config = test_config();
    config.limits.max_document_size_bytes = 16;
    let h = harness_with(config, StaticEmbedder::new(&[]));

    let result = h
        .service
        .upload_document("alice", "big.txt", None, &[b'a'; 32]);
    assert!(matches!(
        result,
        Err(ServiceError::Processing(ProcessingError::FileTooLarge {
            size: 32,
            max: 16
        }))
    ));
}

#[tokio::test]
async fn test_fail_closed_marks_document_failed() {
    let h = harness_with(test_config(), StaticEmbedder::new(&["POISON"]));
    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(Some(2))).await;

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error.is_some());

    // Extract and chunk succeeded, embed failed, index never ran
    let records = h.service.db.list_stage_records(&doc_id).unwrap();
    let embed = records.iter().find(|r| r.stage == Stage::Embed).unwrap();
    assert_eq!(embed.status, StageStatus::Failed);
    assert!(!records.iter().any(|r| r.stage == Stage::Index));

    assert!(h.index.is_empty());
}

#[tokio::test]
async fn test_allow_partial_embeds_surviving_chunks() {
    let mut config = test_config();
    config.pipeline.embed_failure_policy = EmbedFailurePolicy::AllowPartial;
    let h = harness_with(config, StaticEmbedder::new(&["POISON"]));

    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(Some(2))).await;

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Processed);

    let chunks = h.service.db.get_chunks(&doc_id).unwrap();
    assert_eq!(chunks.len(), 5);
    for chunk in &chunks {
        if chunk.chunk_index == 2 {
            assert!(chunk.embedding.is_none());
            assert!(chunk.embed_error.is_some());
        } else {
            assert!(chunk.embedding.is_some(), "chunk {}", chunk.chunk_index);
            assert!(chunk.embed_error.is_none());
        }
    }

    // Only the embedded chunks reach the index
    assert_eq!(h.index.len(), 4);
}

#[tokio::test]
async fn test_reprocess_resumes_from_failed_stage() {
    let h = harness_with(test_config(), StaticEmbedder::new(&["POISON"]));
    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(Some(2))).await;

    assert_eq!(
        h.service.get_document(&doc_id).unwrap().status,
        DocumentStatus::Failed
    );

    // The embedding backend recovers; queue another run
    h.embedder.clear_failures();
    let doc = h.service.reprocess_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Uploaded);
    h.service.process_document(&doc).await;

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Processed);

    // Extract and chunk were not re-run; embed took a second attempt
    let records = h.service.db.list_stage_records(&doc_id).unwrap();
    let attempts = |stage: Stage| records.iter().filter(|r| r.stage == stage).count();
    assert_eq!(attempts(Stage::Extract), 1);
    assert_eq!(attempts(Stage::Chunk), 1);
    assert_eq!(attempts(Stage::Embed), 2);
    assert_eq!(attempts(Stage::Index), 1);
}

#[tokio::test]
async fn test_reprocess_rejects_non_failed_documents() {
    let h = harness();
    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(None)).await;

    let result = h.service.reprocess_document(&doc_id);
    assert!(matches!(
        result,
        Err(ServiceError::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn test_crash_orphans_are_recovered() {
    let h = harness();
    let outcome = h
        .service
        .upload_document("alice", "notes.txt", None, five_paragraph_text(None).as_bytes())
        .unwrap();
    let doc_id = outcome.document.id.clone();

    // Simulate a crash: the document was claimed and the extract stage was
    // mid-flight when the process died
    assert!(h.service.db.claim_document(&doc_id).unwrap());
    let orphan = h.service.db.start_stage(&doc_id, Stage::Extract).unwrap();
    assert_eq!(orphan.status, StageStatus::Running);

    // Startup recovery re-queues the document
    assert_eq!(h.service.db.requeue_orphaned_documents().unwrap(), 1);
    let doc = h.service.db.get_next_queued_document().unwrap().unwrap();
    assert_eq!(doc.id, doc_id);

    h.service.process_document(&doc).await;

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Processed);

    // The orphaned attempt was closed out, not left running
    let records = h.service.db.list_stage_records(&doc_id).unwrap();
    let extract_attempts: Vec<_> = records
        .iter()
        .filter(|r| r.stage == Stage::Extract)
        .collect();
    assert_eq!(extract_attempts.len(), 2);
    assert_eq!(extract_attempts[0].status, StageStatus::Failed);
    assert_eq!(
        extract_attempts[0].error.as_deref(),
        Some("interrupted by restart")
    );
    assert_eq!(extract_attempts[1].status, StageStatus::Succeeded);
}

#[tokio::test]
async fn test_stage_claim_is_exclusive() {
    let h = harness();
    let outcome = h
        .service
        .upload_document("alice", "notes.txt", None, b"some text")
        .unwrap();
    let doc_id = outcome.document.id;

    let first = h.service.db.start_stage(&doc_id, Stage::Extract).unwrap();
    let second = h.service.db.start_stage(&doc_id, Stage::Extract);
    assert!(matches!(
        second,
        Err(ServiceError::Processing(
            ProcessingError::StageAlreadyRunning { .. }
        ))
    ));

    // Once the first attempt finishes, a new one can start
    h.service.db.mark_record_failed(&first.id, "boom").unwrap();
    let retry = h.service.db.start_stage(&doc_id, Stage::Extract).unwrap();
    assert_eq!(retry.attempt, 2);
}

#[tokio::test]
async fn test_search_is_owner_scoped() {
    let h = harness();
    let alice_doc =
        upload_and_process(&h, "alice", "alice.txt", &five_paragraph_text(None)).await;
    let bob_doc = upload_and_process(
        &h,
        "bob",
        "bob.txt",
        "Completely different content about gardening.\n\nTomatoes need sun and water to thrive.",
    )
    .await;

    let hits = h
        .service
        .search("alice", "Paragraph 2 filler starts here", 10)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|hit| hit.document_id == alice_doc));

    let hits = h.service.search("bob", "tomatoes sun", 10).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|hit| hit.document_id == bob_doc));

    let hits = h
        .service
        .search("nobody", "anything at all", 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_delete_removes_all_derived_data() {
    let h = harness();
    let keep_id = upload_and_process(&h, "alice", "keep.txt", &five_paragraph_text(None)).await;
    let drop_id = upload_and_process(
        &h,
        "alice",
        "drop.txt",
        "Some other document body.\n\nIt will be deleted shortly.",
    )
    .await;

    let keep_entries = h.service.db.get_chunks(&keep_id).unwrap().len();
    assert!(h.index.len() > keep_entries);

    h.service.delete_document(&drop_id).unwrap();

    assert!(h.service.db.get_document(&drop_id).unwrap().is_none());
    assert!(h.service.db.get_chunks(&drop_id).unwrap().is_empty());
    assert!(h.service.db.list_stage_records(&drop_id).unwrap().is_empty());
    assert_eq!(h.index.len(), keep_entries);

    // The surviving document is untouched
    assert_eq!(
        h.service.get_document(&keep_id).unwrap().status,
        DocumentStatus::Processed
    );

    let result = h.service.delete_document(&drop_id);
    assert!(matches!(
        result,
        Err(ServiceError::DocumentNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cancellation_stops_processing() {
    let mut config = test_config();
    config.pipeline.embed_concurrency = 1;
    let h = harness_with(config, StaticEmbedder::with_delay(Duration::from_millis(200)));

    let outcome = h
        .service
        .upload_document("alice", "slow.txt", None, five_paragraph_text(None).as_bytes())
        .unwrap();
    let doc = outcome.document;
    let doc_id = doc.id.clone();

    let service = h.service.clone();
    let task = tokio::spawn(async move {
        service.process_document(&doc).await;
    });

    // Let processing reach the embed stage, then cancel
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.service.cancel_processing(&doc_id).unwrap());
    task.await.unwrap();

    let doc = h.service.get_document(&doc_id).unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.error.as_deref(), Some("processing cancelled"));

    // The embedding call that was in flight when cancellation arrived
    // completed and its vector was persisted; later chunks never started
    let chunks = h.service.db.get_chunks(&doc_id).unwrap();
    assert!(chunks[0].embedding.is_some());
    assert!(chunks.last().unwrap().embedding.is_none());

    // Cancelling again reports nothing in flight
    assert!(!h.service.cancel_processing(&doc_id).unwrap());
}

#[tokio::test]
async fn test_document_details_include_history() {
    let h = harness();
    let doc_id = upload_and_process(&h, "alice", "notes.txt", &five_paragraph_text(None)).await;

    let details = h.service.get_document_details(&doc_id).unwrap();
    assert_eq!(details.document.id, doc_id);
    assert_eq!(details.stage_records.len(), 4);
    assert_eq!(details.chunk_count, 5);
}
