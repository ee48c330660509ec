use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{document_location, document_prefix, sha256_hex, StorageManager},
        types::{
            document::{Document, DocumentStatus, DocumentTransition, NewDocument},
            document_chunk::DocumentChunk,
        },
    },
    utils::ingest_limits::validate_upload,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;

/// An upload as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub course_id: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentStatusReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub chunk_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentStatusReport {
    fn from(document: &Document) -> Self {
        Self {
            document_id: document.id.clone(),
            status: document.status,
            error_code: document.error_code.clone(),
            error: document.error_message.clone(),
            attempts: document.attempts,
            chunk_count: document.chunk_count,
            updated_at: document.updated_at,
        }
    }
}

/// Entry points used by upload handlers and operators.
#[derive(Clone)]
pub struct IngestionService {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    dispatcher: Dispatcher,
    stale_after: Duration,
}

impl IngestionService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        dispatcher: Dispatcher,
        stale_after: Duration,
    ) -> Self {
        Self {
            db,
            storage,
            dispatcher,
            stale_after,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Validates and stores an upload, creates its `PENDING` record and schedules processing.
    ///
    /// Returns as soon as the record exists; extraction happens in the background.
    #[instrument(skip_all, fields(owner_id = %request.owner_id, mime_type = %request.mime_type))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, AppError> {
        let size_bytes = u64::try_from(request.bytes.len()).unwrap_or(u64::MAX);
        let format = validate_upload(&request.file_name, &request.mime_type, size_bytes)?;

        let document_id = Uuid::new_v4().to_string();
        let storage_location =
            document_location(&request.owner_id, &document_id, &request.file_name);
        let sha256 = sha256_hex(&request.bytes);

        self.storage
            .put(&storage_location, request.bytes)
            .await?;

        let new_document = NewDocument {
            id: document_id.clone(),
            owner_id: request.owner_id.clone(),
            course_id: request.course_id,
            file_name: request.file_name,
            format,
            size_bytes,
            sha256,
            storage_location,
        };

        if let Err(err) = Document::create_and_add_to_db(new_document, &self.db).await {
            let prefix = document_prefix(&request.owner_id, &document_id);
            if let Err(cleanup_err) = self.storage.delete_prefix(&prefix).await {
                warn!(%document_id, error = %cleanup_err, "failed to remove orphaned upload");
            }
            return Err(err);
        }

        info!(%document_id, %format, size_bytes, "document submitted");
        self.dispatcher.dispatch(document_id.clone());

        Ok(document_id)
    }

    /// Restarts the pipeline for a document that is not currently processing.
    ///
    /// The `PROCESSING` claim, which also drops the previous chunks, is taken before this
    /// returns, so a second call observes the conflict.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn reprocess(&self, document_id: &str) -> Result<(), AppError> {
        let claimed =
            Document::claim_for_processing(document_id, DocumentTransition::Reprocess, &self.db)
                .await?;

        info!(
            %document_id,
            attempt = claimed.attempts,
            "document reprocessing accepted"
        );
        self.dispatcher.dispatch_claimed(claimed);

        Ok(())
    }

    pub async fn get_status(&self, document_id: &str) -> Result<DocumentStatusReport, AppError> {
        let document = Document::get_by_id(document_id, &self.db).await?;
        Ok(DocumentStatusReport::from(&document))
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Document, AppError> {
        Document::get_by_id(document_id, &self.db).await
    }

    /// Chunks in sequence order. Empty unless the document is `COMPLETED`.
    pub async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>, AppError> {
        // Fails with NotFound for unknown documents.
        Document::get_by_id(document_id, &self.db).await?;
        DocumentChunk::get_by_document_id(document_id, &self.db).await
    }

    /// Removes the document, its chunks and its stored bytes.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn delete(&self, document_id: &str) -> Result<(), AppError> {
        let removed = Document::delete_with_chunks(document_id, &self.db).await?;

        let prefix = document_prefix(&removed.owner_id, &removed.id);
        if let Err(err) = self.storage.delete_prefix(&prefix).await {
            warn!(%document_id, error = %err, "document deleted but its stored bytes remain");
        }

        info!(%document_id, status = %removed.status, "document deleted");
        Ok(())
    }

    /// Documents stuck in `PROCESSING` for longer than `threshold` (or the configured default).
    pub async fn stale_documents(
        &self,
        threshold: Option<Duration>,
    ) -> Result<Vec<Document>, AppError> {
        let threshold = threshold.unwrap_or(self.stale_after);
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|err| AppError::InternalError(format!("invalid stale threshold: {err}")))?;
        let cutoff = Utc::now() - threshold;

        Document::list_stale_processing(cutoff, &self.db).await
    }

    /// Waits for every background run started through this service.
    pub async fn drain(&self) {
        self.dispatcher.drain().await;
    }
}
