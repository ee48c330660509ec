use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_openai::config::OpenAIConfig;
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{document_location, document_prefix, StorageManager},
        types::{
            document::{Document, DocumentStatus, DocumentTransition, NewDocument},
            document_chunk::DocumentChunk,
        },
    },
    utils::ingest_limits::DocumentFormat,
};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use super::{
    config::{IngestionConfig, IngestionTuning},
    services::{DefaultPipelineServices, PipelineServices},
    IngestionPipeline,
};
use crate::{
    dispatcher::Dispatcher,
    service::{IngestionService, SubmitRequest},
    test_fixtures::{docx_with_paragraphs, pdf_with_pages},
    utils::{
        chunking::TextFragment,
        file_text_extraction::{ExtractedText, ExtractorRegistry},
        pdf_ingestion::PdfExtractor,
    },
};

const OWNER: &str = "student-7";

async fn memory_db() -> Arc<SurrealDbClient> {
    let database = Uuid::new_v4().to_string();
    let db = SurrealDbClient::memory("test_ns", &database)
        .await
        .expect("in-memory surrealdb");
    db.ensure_initialized().await.expect("indexes");
    Arc::new(db)
}

fn test_config() -> IngestionConfig {
    IngestionConfig {
        tuning: IngestionTuning {
            chunk_max_chars: 120,
            chunk_overlap_chars: 20,
            ..IngestionTuning::default()
        },
        ocr_model: "vision-test".into(),
    }
}

fn default_services(storage: &StorageManager) -> Arc<dyn PipelineServices> {
    let client = async_openai::Client::with_config(OpenAIConfig::new().with_api_key("test"));
    Arc::new(
        DefaultPipelineServices::with_default_extractors(
            storage.clone(),
            Arc::new(client),
            &test_config(),
        )
        .expect("default services"),
    )
}

struct Harness {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    pipeline: Arc<IngestionPipeline>,
    service: IngestionService,
}

async fn harness(services: impl FnOnce(&StorageManager) -> Arc<dyn PipelineServices>) -> Harness {
    let db = memory_db().await;
    let storage = StorageManager::in_memory();
    let pipeline = Arc::new(
        IngestionPipeline::with_services(Arc::clone(&db), test_config(), services(&storage))
            .expect("pipeline"),
    );
    let service = IngestionService::new(
        Arc::clone(&db),
        storage.clone(),
        Dispatcher::new(Arc::clone(&pipeline)),
        Duration::from_secs(900),
    );

    Harness {
        db,
        storage,
        pipeline,
        service,
    }
}

async fn gated_harness() -> (Harness, Arc<Semaphore>) {
    let mut gate = None;
    let h = harness(|storage| {
        let (services, installed) = GatedServices::wrap(default_services(storage));
        gate = Some(installed);
        services
    })
    .await;
    (h, gate.expect("gate installed"))
}

fn upload(file_name: &str, mime_type: &str, bytes: Vec<u8>) -> SubmitRequest {
    SubmitRequest {
        owner_id: OWNER.into(),
        course_id: Some("bio-101".into()),
        file_name: file_name.into(),
        mime_type: mime_type.into(),
        bytes: Bytes::from(bytes),
    }
}

fn three_page_pdf() -> Vec<u8> {
    pdf_with_pages(&[
        &[
            "Cells are the basic unit of life.",
            "Every living organism is made of one or more cells.",
        ],
        &[
            "Mitochondria produce most of the energy of the cell.",
            "They carry their own small circular genome.",
        ],
        &[
            "Ribosomes assemble proteins from amino acids.",
            "They translate messenger RNA into polypeptide chains.",
        ],
    ])
}

fn assert_contiguous(chunks: &[DocumentChunk]) {
    let indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
    let expected: Vec<u32> = (0..u32::try_from(chunks.len()).expect("count")).collect();
    assert_eq!(indices, expected);
}

/// Holds every `fetch_source` call until the test releases it.
struct GatedServices {
    inner: Arc<dyn PipelineServices>,
    gate: Arc<Semaphore>,
}

impl GatedServices {
    fn wrap(inner: Arc<dyn PipelineServices>) -> (Arc<dyn PipelineServices>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let services = Arc::new(Self {
            inner,
            gate: Arc::clone(&gate),
        });
        (services, gate)
    }
}

#[async_trait]
impl PipelineServices for GatedServices {
    async fn fetch_source(&self, document: &Document) -> Result<Bytes, AppError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| AppError::InternalError(err.to_string()))?;
        self.inner.fetch_source(document).await
    }

    async fn extract_text(
        &self,
        bytes: Bytes,
        format: DocumentFormat,
    ) -> Result<ExtractedText, AppError> {
        self.inner.extract_text(bytes, format).await
    }

    async fn split_text(&self, text: &str) -> Result<Vec<TextFragment>, AppError> {
        self.inner.split_text(text).await
    }
}

struct MockServices {
    calls: Mutex<Vec<&'static str>>,
    failing_runs: AtomicUsize,
    colliding_indices: bool,
}

impl MockServices {
    fn new() -> Self {
        Self::failing_first(0)
    }

    /// The first `runs` extractions fail.
    fn failing_first(runs: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing_runs: AtomicUsize::new(runs),
            colliding_indices: false,
        }
    }

    /// Every fragment claims position 0, so the chunk commit is rejected by the database.
    fn colliding() -> Self {
        Self {
            colliding_indices: true,
            ..Self::new()
        }
    }

    async fn record(&self, stage: &'static str) {
        self.calls.lock().await.push(stage);
    }
}

#[async_trait]
impl PipelineServices for MockServices {
    async fn fetch_source(&self, _document: &Document) -> Result<Bytes, AppError> {
        self.record("fetch").await;
        Ok(Bytes::from_static(b"mock source"))
    }

    async fn extract_text(
        &self,
        _bytes: Bytes,
        format: DocumentFormat,
    ) -> Result<ExtractedText, AppError> {
        self.record("extract").await;
        let remaining = self.failing_runs.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_runs.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Extraction("mock extraction failure".into()));
        }
        Ok(ExtractedText {
            text: "First paragraph.\n\nSecond paragraph.".into(),
            extractor: "mock",
            format,
        })
    }

    async fn split_text(&self, text: &str) -> Result<Vec<TextFragment>, AppError> {
        self.record("split").await;
        let mut fragments = Vec::new();
        let mut offset = 0;
        for (index, part) in text.split("\n\n").enumerate() {
            fragments.push(TextFragment {
                index: if self.colliding_indices {
                    0
                } else {
                    u32::try_from(index).expect("index")
                },
                byte_offset: offset,
                content: part.to_string(),
            });
            offset += part.len() + 2;
        }
        Ok(fragments)
    }
}

async fn pending_document(db: &SurrealDbClient, storage_location: &str) -> Document {
    record_document(db, Uuid::new_v4().to_string(), storage_location, 11).await
}

async fn record_document(
    db: &SurrealDbClient,
    id: String,
    storage_location: &str,
    size_bytes: u64,
) -> Document {
    Document::create_and_add_to_db(
        NewDocument {
            id,
            owner_id: OWNER.into(),
            course_id: None,
            file_name: "notes.pdf".into(),
            format: DocumentFormat::Pdf,
            size_bytes,
            sha256: "irrelevant".into(),
            storage_location: storage_location.into(),
        },
        db,
    )
    .await
    .expect("create document")
}

/// Stores `bytes` as a PDF upload and records a PENDING document without dispatching it.
async fn stored_pdf(h: &Harness, bytes: Vec<u8>) -> Document {
    let id = Uuid::new_v4().to_string();
    let location = document_location(OWNER, &id, "notes.pdf");
    let size = u64::try_from(bytes.len()).expect("size");
    h.storage
        .put(&location, Bytes::from(bytes))
        .await
        .expect("put");
    record_document(&h.db, id, &location, size).await
}

#[tokio::test]
async fn text_pdf_is_ingested_into_ordered_chunks() {
    let h = harness(default_services).await;
    let pdf = three_page_pdf();

    let id = h
        .service
        .submit(upload("cells.pdf", "application/pdf", pdf.clone()))
        .await
        .expect("submit");
    assert!(!id.is_empty());

    h.service.drain().await;

    let status = h.service.get_status(&id).await.expect("status");
    assert_eq!(status.status, DocumentStatus::Completed);
    assert_eq!(status.error, None);
    assert_eq!(status.attempts, 1);

    let chunks = h.service.get_chunks(&id).await.expect("chunks");
    assert!(!chunks.is_empty());
    assert_eq!(status.chunk_count as usize, chunks.len());
    assert_contiguous(&chunks);

    let mut registry = ExtractorRegistry::new();
    registry.register(DocumentFormat::Pdf, Arc::new(PdfExtractor));
    let normalized = registry
        .extract(Bytes::from(pdf), DocumentFormat::Pdf)
        .await
        .expect("extract")
        .text;
    assert!(normalized.starts_with(&chunks[0].content));
    assert!(normalized.contains("Ribosomes assemble proteins"));

    assert_eq!(chunks[0].metadata["extractor"], "pdf");
    assert_eq!(chunks[0].metadata["mime_type"], "application/pdf");
    assert_eq!(chunks[0].metadata["byte_offset"], 0);
}

#[tokio::test]
async fn recorded_document_starts_pending_without_chunks() {
    let h = harness(default_services).await;

    let document = stored_pdf(&h, three_page_pdf()).await;
    let stored = Document::get_by_id(&document.id, &h.db)
        .await
        .expect("fetch");
    assert_eq!(stored.status, DocumentStatus::Pending);
    assert_eq!(stored.attempts, 0);
    assert!(DocumentChunk::get_by_document_id(&document.id, &h.db)
        .await
        .expect("chunks")
        .is_empty());
}

#[tokio::test]
async fn run_is_processing_while_extraction_is_in_flight() {
    let (h, gate) = gated_harness().await;

    let id = h
        .service
        .submit(upload("cells.pdf", "application/pdf", three_page_pdf()))
        .await
        .expect("submit");

    let early = h.service.get_status(&id).await.expect("status");
    assert!(matches!(
        early.status,
        DocumentStatus::Pending | DocumentStatus::Processing
    ));
    assert!(h.service.get_chunks(&id).await.expect("chunks").is_empty());

    gate.add_permits(1);
    h.service.drain().await;

    let done = h.service.get_status(&id).await.expect("status");
    assert_eq!(done.status, DocumentStatus::Completed);
}

#[tokio::test]
async fn docx_upload_is_ingested() {
    let h = harness(default_services).await;
    let docx = docx_with_paragraphs(&["Osmosis", "Water moves across a membrane."]);

    let id = h
        .service
        .submit(upload(
            "osmosis.docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            docx,
        ))
        .await
        .expect("submit");
    h.service.drain().await;

    let chunks = h.service.get_chunks(&id).await.expect("chunks");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "Osmosis\nWater moves across a membrane.");
    assert_eq!(chunks[0].metadata["extractor"], "docx");
}

#[tokio::test]
async fn plain_text_upload_is_rejected_without_state() {
    let h = harness(default_services).await;

    let err = h
        .service
        .submit(upload("notes.txt", "text/plain", b"hello".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(err.is_synchronous_rejection());

    let documents: Vec<Document> = h.db.get_all_stored_items().await.expect("documents");
    assert!(documents.is_empty());
    assert!(h.storage.list(None).await.expect("list").is_empty());
    assert_eq!(h.service.dispatcher().in_flight(), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let h = harness(default_services).await;
    let too_big = vec![0u8; 10 * 1024 * 1024 + 1];

    let err = h
        .service
        .submit(upload("huge.pdf", "application/pdf", too_big))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    let documents: Vec<Document> = h.db.get_all_stored_items().await.expect("documents");
    assert!(documents.is_empty());
}

#[tokio::test]
async fn corrupt_pdf_ends_failed_with_diagnostic() {
    let h = harness(default_services).await;

    let id = h
        .service
        .submit(upload(
            "broken.pdf",
            "application/pdf",
            b"this is definitely not a pdf document".to_vec(),
        ))
        .await
        .expect("submit is accepted");
    h.service.drain().await;

    let status = h.service.get_status(&id).await.expect("status");
    assert_eq!(status.status, DocumentStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("extraction_failed"));
    assert!(status.error.as_deref().is_some_and(|msg| !msg.is_empty()));
    assert!(h.service.get_chunks(&id).await.expect("chunks").is_empty());
}

#[tokio::test]
async fn missing_source_bytes_fail_the_run() {
    let h = harness(default_services).await;
    let document = pending_document(&h.db, "student-7/gone/notes.pdf").await;

    let outcome = h
        .pipeline
        .process_document(&document.id)
        .await
        .expect("outcome persisted");

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert_eq!(outcome.error_code.as_deref(), Some("storage_fetch_failed"));
    assert_eq!(outcome.run_id, None);
    assert_eq!(
        DocumentChunk::count_for_document(&document.id, &h.db)
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn stages_run_in_order_and_commit_chunks() {
    let mock = Arc::new(MockServices::new());
    let services: Arc<dyn PipelineServices> = Arc::clone(&mock) as Arc<dyn PipelineServices>;
    let h = harness(move |_| services).await;
    let document = pending_document(&h.db, "unused").await;

    let completed = h
        .pipeline
        .process_document(&document.id)
        .await
        .expect("run");

    assert_eq!(completed.status, DocumentStatus::Completed);
    assert_eq!(completed.chunk_count, 2);
    assert_eq!(*mock.calls.lock().await, vec!["fetch", "extract", "split"]);

    let chunks = DocumentChunk::get_by_document_id(&document.id, &h.db)
        .await
        .expect("chunks");
    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["First paragraph.", "Second paragraph."]);
    assert_eq!(chunks[1].metadata["byte_offset"], 18);
    assert_eq!(chunks[1].metadata["extractor"], "mock");
}

#[tokio::test]
async fn extraction_failure_skips_remaining_stages() {
    let mock = Arc::new(MockServices::failing_first(1));
    let services: Arc<dyn PipelineServices> = Arc::clone(&mock) as Arc<dyn PipelineServices>;
    let h = harness(move |_| services).await;
    let document = pending_document(&h.db, "unused").await;

    let failed = h
        .pipeline
        .process_document(&document.id)
        .await
        .expect("outcome persisted");

    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("extraction_failed"));
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|msg| msg.contains("mock extraction failure")));
    assert_eq!(*mock.calls.lock().await, vec!["fetch", "extract"]);
}

#[tokio::test]
async fn reprocess_recovers_a_failed_document() {
    let mock = Arc::new(MockServices::failing_first(1));
    let services: Arc<dyn PipelineServices> = Arc::clone(&mock) as Arc<dyn PipelineServices>;
    let h = harness(move |_| services).await;
    let document = pending_document(&h.db, "unused").await;

    let failed = h
        .pipeline
        .process_document(&document.id)
        .await
        .expect("first run");
    assert_eq!(failed.status, DocumentStatus::Failed);

    h.service.reprocess(&document.id).await.expect("accepted");
    h.service.drain().await;

    let recovered = h.service.get_document(&document.id).await.expect("fetch");
    assert_eq!(recovered.status, DocumentStatus::Completed);
    assert_eq!(recovered.error_code, None);
    assert_eq!(recovered.error_message, None);
    assert_eq!(recovered.attempts, 2);
    assert_contiguous(&h.service.get_chunks(&document.id).await.expect("chunks"));
}

#[tokio::test]
async fn reprocess_of_completed_document_replaces_chunks() {
    let h = harness(default_services).await;
    let id = h
        .service
        .submit(upload("cells.pdf", "application/pdf", three_page_pdf()))
        .await
        .expect("submit");
    h.service.drain().await;
    let before = h.service.get_chunks(&id).await.expect("chunks");
    assert!(!before.is_empty());

    h.service.reprocess(&id).await.expect("accepted");
    h.service.drain().await;

    let after = h.service.get_chunks(&id).await.expect("chunks");
    assert_eq!(after.len(), before.len());
    assert_contiguous(&after);
    for (old, new) in before.iter().zip(&after) {
        assert_ne!(old.id, new.id);
        assert_eq!(old.content, new.content);
    }
    let status = h.service.get_status(&id).await.expect("status");
    assert_eq!(status.status, DocumentStatus::Completed);
    assert_eq!(status.attempts, 2);
}

#[tokio::test]
async fn reprocess_while_processing_is_rejected() {
    let (h, gate) = gated_harness().await;

    let document = stored_pdf(&h, three_page_pdf()).await;

    let (first, second) = tokio::join!(
        h.service.reprocess(&document.id),
        h.service.reprocess(&document.id)
    );
    let outcomes = [first, second];
    let accepted = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(AppError::ConcurrencyConflict(_))))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(conflicts, 1);

    let processing = h.service.get_document(&document.id).await.expect("fetch");
    assert_eq!(processing.status, DocumentStatus::Processing);
    assert_eq!(processing.attempts, 1);

    // A later call still observes the running claim and changes nothing.
    let err = h.service.reprocess(&document.id).await.unwrap_err();
    assert!(matches!(err, AppError::ConcurrencyConflict(_)));
    assert_eq!(err.code(), "in_progress");
    let unchanged = h.service.get_document(&document.id).await.expect("fetch");
    assert_eq!(unchanged.run_id, processing.run_id);
    assert_eq!(unchanged.attempts, 1);

    gate.add_permits(1);
    h.service.drain().await;

    let done = h.service.get_document(&document.id).await.expect("fetch");
    assert_eq!(done.status, DocumentStatus::Completed);
    assert_eq!(done.attempts, 1);
}

#[tokio::test]
async fn delete_removes_document_chunks_and_bytes() {
    let h = harness(default_services).await;
    let id = h
        .service
        .submit(upload("cells.pdf", "application/pdf", three_page_pdf()))
        .await
        .expect("submit");
    h.service.drain().await;
    assert!(!h.service.get_chunks(&id).await.expect("chunks").is_empty());

    h.service.delete(&id).await.expect("delete");

    assert_eq!(
        DocumentChunk::count_for_document(&id, &h.db)
            .await
            .expect("count"),
        0
    );
    assert!(matches!(
        h.service.get_status(&id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.service.get_chunks(&id).await,
        Err(AppError::NotFound(_))
    ));
    let prefix = document_prefix(OWNER, &id);
    assert!(h.storage.list(Some(&prefix)).await.expect("list").is_empty());
}

#[tokio::test]
async fn delete_during_a_run_discards_its_results() {
    let (h, gate) = gated_harness().await;

    let id = h
        .service
        .submit(upload("cells.pdf", "application/pdf", three_page_pdf()))
        .await
        .expect("submit");

    // Wait for the background run to take its claim.
    for _ in 0..100 {
        if h.service.get_status(&id).await.expect("status").status == DocumentStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.service.delete(&id).await.expect("delete");
    gate.add_permits(1);
    h.service.drain().await;

    assert!(matches!(
        Document::get_by_id(&id, &h.db).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(
        DocumentChunk::count_for_document(&id, &h.db)
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn stale_documents_lists_long_running_claims() {
    let h = harness(default_services).await;
    let document = pending_document(&h.db, "unused").await;
    Document::claim_for_processing(&document.id, DocumentTransition::Start, &h.db)
        .await
        .expect("claim");
    tokio::time::sleep(Duration::from_millis(5)).await;

    let stale = h
        .service
        .stale_documents(Some(Duration::ZERO))
        .await
        .expect("stale");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, document.id);

    assert!(h
        .service
        .stale_documents(None)
        .await
        .expect("stale")
        .is_empty());
}

#[tokio::test]
async fn text_free_pdf_fails_with_chunking_diagnostic() {
    let h = harness(default_services).await;
    let blank = pdf_with_pages(&[&[], &[]]);

    let id = h
        .service
        .submit(upload("blank.pdf", "application/pdf", blank))
        .await
        .expect("submit is accepted");
    h.service.drain().await;

    let status = h.service.get_status(&id).await.expect("status");
    assert_eq!(status.status, DocumentStatus::Failed);
    assert_eq!(status.error_code.as_deref(), Some("chunking_failed"));
    assert!(status.error.as_deref().is_some_and(|msg| !msg.is_empty()));
    assert_eq!(status.chunk_count, 0);
    assert!(h.service.get_chunks(&id).await.expect("chunks").is_empty());
}

#[tokio::test]
async fn rejected_commit_marks_the_document_failed() {
    let mock = Arc::new(MockServices::colliding());
    let services: Arc<dyn PipelineServices> = Arc::clone(&mock) as Arc<dyn PipelineServices>;
    let h = harness(move |_| services).await;
    let document = pending_document(&h.db, "unused").await;

    let failed = h
        .pipeline
        .process_document(&document.id)
        .await
        .expect("outcome persisted");

    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("database_error"));
    assert_eq!(failed.run_id, None);
    assert_eq!(
        DocumentChunk::count_for_document(&document.id, &h.db)
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn queued_run_does_not_restart_a_failed_document() {
    let h = harness(default_services).await;
    let document = stored_pdf(&h, b"not a pdf at all".to_vec()).await;

    h.service.dispatcher().dispatch(document.id.clone());
    h.service.drain().await;
    let failed = h.service.get_document(&document.id).await.expect("fetch");
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.attempts, 1);

    h.service.dispatcher().dispatch(document.id.clone());
    h.service.drain().await;

    let unchanged = h.service.get_document(&document.id).await.expect("fetch");
    assert_eq!(unchanged.status, DocumentStatus::Failed);
    assert_eq!(unchanged.attempts, 1);
    assert_eq!(unchanged.error_code, failed.error_code);

    assert!(matches!(
        h.pipeline.process_document(&document.id).await,
        Err(AppError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn submitted_run_and_reprocess_race_to_a_single_run() {
    let (h, gate) = gated_harness().await;

    let id = h
        .service
        .submit(upload(
            "broken.pdf",
            "application/pdf",
            b"this is definitely not a pdf document".to_vec(),
        ))
        .await
        .expect("submit");
    let reprocessed = h.service.reprocess(&id).await;
    assert!(matches!(
        reprocessed,
        Ok(()) | Err(AppError::ConcurrencyConflict(_))
    ));

    // Enough permits for a second run to get through if one were ever started.
    gate.add_permits(4);
    h.service.drain().await;

    let done = h.service.get_document(&id).await.expect("fetch");
    assert_eq!(done.status, DocumentStatus::Failed);
    assert_eq!(done.error_code.as_deref(), Some("extraction_failed"));
    assert_eq!(done.attempts, 1);

    h.service.drain().await;
    let settled = h.service.get_document(&id).await.expect("fetch");
    assert_eq!(settled.attempts, 1);
    assert_eq!(settled.updated_at, done.updated_at);
}
