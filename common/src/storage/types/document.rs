use std::{future::Future, time::Duration};

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::{is_transaction_conflict, SurrealDbClient},
    stored_object,
    utils::ingest_limits::DocumentFormat,
};

use super::document_chunk::DocumentChunk;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Pending,
        DocumentStatus::Processing,
        DocumentStatus::Completed,
        DocumentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTransition {
    /// First run of a freshly submitted document. Only legal from `PENDING`, so a
    /// queued run never re-enters a document some other run already finished.
    Start,
    /// Explicit re-entry requested by a caller; also allowed from `COMPLETED`.
    Reprocess,
    Complete,
    Fail,
}

impl DocumentTransition {
    fn as_str(self) -> &'static str {
        match self {
            DocumentTransition::Start => "start",
            DocumentTransition::Reprocess => "reprocess",
            DocumentTransition::Complete => "complete",
            DocumentTransition::Fail => "fail",
        }
    }

    /// Statuses from which this transition is legal.
    pub fn allowed_from(self) -> Vec<DocumentStatus> {
        DocumentStatus::ALL
            .into_iter()
            .filter(|status| compute_next_state(status, self).is_ok())
            .collect()
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: DocumentLifecycleMachine,
        initial: Pending,
        states: [Pending, Processing, Completed, Failed],
        events {
            start {
                transition: { from: Pending, to: Processing }
            }
            reprocess {
                transition: { from: Pending, to: Processing }
                transition: { from: Failed, to: Processing }
                transition: { from: Completed, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> DocumentLifecycleMachine<(), Pending> {
        DocumentLifecycleMachine::new(())
    }

    pub(super) fn processing() -> Option<DocumentLifecycleMachine<(), Processing>> {
        pending().start().ok()
    }

    pub(super) fn completed() -> Option<DocumentLifecycleMachine<(), Completed>> {
        processing().and_then(|machine| machine.complete().ok())
    }

    pub(super) fn failed() -> Option<DocumentLifecycleMachine<(), Failed>> {
        processing().and_then(|machine| machine.fail().ok())
    }
}

fn invalid_transition(state: &DocumentStatus, event: DocumentTransition) -> AppError {
    AppError::InvalidTransition(format!(
        "Invalid document transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

/// Checks `event` against the declared lifecycle and returns the resulting status.
pub fn compute_next_state(
    state: &DocumentStatus,
    event: DocumentTransition,
) -> Result<DocumentStatus, AppError> {
    use lifecycle::{completed, failed, pending, processing};

    let next = match (state, event) {
        (DocumentStatus::Pending, DocumentTransition::Start) => {
            pending().start().ok().map(|_| DocumentStatus::Processing)
        }
        (DocumentStatus::Pending, DocumentTransition::Reprocess) => {
            pending().reprocess().ok().map(|_| DocumentStatus::Processing)
        }
        (DocumentStatus::Failed, DocumentTransition::Reprocess) => failed()
            .and_then(|m| m.reprocess().ok())
            .map(|_| DocumentStatus::Processing),
        (DocumentStatus::Completed, DocumentTransition::Reprocess) => completed()
            .and_then(|m| m.reprocess().ok())
            .map(|_| DocumentStatus::Processing),
        (DocumentStatus::Processing, DocumentTransition::Complete) => processing()
            .and_then(|m| m.complete().ok())
            .map(|_| DocumentStatus::Completed),
        (DocumentStatus::Processing, DocumentTransition::Fail) => processing()
            .and_then(|m| m.fail().ok())
            .map(|_| DocumentStatus::Failed),
        _ => None,
    };

    next.ok_or_else(|| invalid_transition(state, event))
}

stored_object!(Document, "document", {
    owner_id: String,
    course_id: Option<String>,
    file_name: String,
    mime_type: String,
    format: DocumentFormat,
    size_bytes: u64,
    sha256: String,
    storage_location: String,
    status: DocumentStatus,
    run_id: Option<String>,
    attempts: u32,
    error_code: Option<String>,
    error_message: Option<String>,
    chunk_count: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processing_started_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<DateTime<Utc>>
});

/// Everything known about an upload once its bytes have been stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub owner_id: String,
    pub course_id: Option<String>,
    pub file_name: String,
    pub format: DocumentFormat,
    pub size_bytes: u64,
    pub sha256: String,
    pub storage_location: String,
}

/// Diagnostic persisted on a `FAILED` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for DocumentFailure {
    fn from(err: &AppError) -> Self {
        let message = err.to_string();
        Self {
            code: err.code().to_string(),
            message: if message.trim().is_empty() {
                "unknown failure".to_string()
            } else {
                message
            },
        }
    }
}

const CLAIM_QUERY: &str = r#"
    BEGIN TRANSACTION;
    LET $claimed = (
        UPDATE type::thing($table, $id)
        SET status = $processing,
            run_id = $run_id,
            attempts += 1,
            error_code = NONE,
            error_message = NONE,
            chunk_count = 0,
            processing_started_at = $now,
            completed_at = NONE,
            updated_at = $now
        WHERE status IN $allowed_states
        RETURN AFTER
    );
    IF array::len($claimed) > 0 {
        DELETE type::table($chunk_table) WHERE document_id = $id;
    };
    COMMIT TRANSACTION;
"#;

const FAIL_QUERY: &str = r#"
    BEGIN TRANSACTION;
    LET $failed = (
        UPDATE type::thing($table, $id)
        SET status = $failed_state,
            run_id = NONE,
            error_code = $error_code,
            error_message = $error_message,
            chunk_count = 0,
            completed_at = $now,
            updated_at = $now
        WHERE status = $processing AND run_id = $run_id
        RETURN AFTER
    );
    IF array::len($failed) > 0 {
        DELETE type::table($chunk_table) WHERE document_id = $id;
    };
    COMMIT TRANSACTION;
"#;

const DELETE_QUERY: &str = r#"
    BEGIN TRANSACTION;
    DELETE type::table($chunk_table) WHERE document_id = $id;
    DELETE type::thing($table, $id);
    COMMIT TRANSACTION;
"#;

fn commit_query() -> String {
    format!(
        r#"
        BEGIN TRANSACTION;
        LET $completed = (
            UPDATE type::thing($table, $id)
            SET status = $completed_state,
                run_id = NONE,
                error_code = NONE,
                error_message = NONE,
                chunk_count = $chunk_count,
                completed_at = $now,
                updated_at = $now
            WHERE status = $processing AND run_id = $run_id
            RETURN AFTER
        );
        IF array::len($completed) = 0 {{
            THROW "document run is no longer active";
        }};
        DELETE type::table($chunk_table) WHERE document_id = $id;
        INSERT INTO {chunk_table} $chunks;
        COMMIT TRANSACTION;
        "#,
        chunk_table = DocumentChunk::table_name()
    )
}

fn lost_run(document_id: &str) -> AppError {
    AppError::ConcurrencyConflict(format!(
        "document {document_id} is owned by another processing run"
    ))
}

const TERMINAL_WRITE_ATTEMPTS: u32 = 4;
const TERMINAL_WRITE_INITIAL_BACKOFF_MS: u64 = 25;
const TERMINAL_WRITE_MAX_BACKOFF_MS: u64 = 400;

/// Where a terminal write left the document, judged from a re-read of the record.
#[derive(Debug)]
enum TerminalWrite {
    Landed(Document),
    /// Still `PROCESSING` under this run; the write did not apply.
    Owned(Option<surrealdb::Error>),
    /// Another run holds the document, or it was deleted.
    Lost,
}

fn settle_terminal_write(
    outcome: Result<(), surrealdb::Error>,
    stored: Option<Document>,
    run_id: &str,
    landed: impl Fn(&Document) -> bool,
) -> TerminalWrite {
    match stored {
        Some(doc) if outcome.is_ok() && landed(&doc) => TerminalWrite::Landed(doc),
        Some(doc)
            if doc.status == DocumentStatus::Processing
                && doc.run_id.as_deref() == Some(run_id) =>
        {
            TerminalWrite::Owned(outcome.err())
        }
        _ => TerminalWrite::Lost,
    }
}

impl Document {
    pub fn new(new: NewDocument) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: new.id,
            owner_id: new.owner_id,
            course_id: new.course_id,
            file_name: new.file_name,
            mime_type: new.format.as_mime().to_string(),
            format: new.format,
            size_bytes: new.size_bytes,
            sha256: new.sha256,
            storage_location: new.storage_location,
            status: DocumentStatus::Pending,
            run_id: None,
            attempts: 0,
            error_code: None,
            error_message: None,
            chunk_count: 0,
            processing_started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create_and_add_to_db(
        new: NewDocument,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let document = Self::new(new);
        db.store_item(document.clone()).await?;
        Ok(document)
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Document, AppError> {
        db.get_item::<Document>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {id}")))
    }

    /// Atomically moves the document into `PROCESSING` and clears its chunks.
    ///
    /// The status guard and the write happen in one transaction, so of any number of
    /// concurrent claims at most one succeeds. The winner is identified by a fresh
    /// `run_id`, which every later terminal write must present.
    #[tracing::instrument(skip_all, fields(document_id = %id, transition = event.as_str()))]
    pub async fn claim_for_processing(
        id: &str,
        event: DocumentTransition,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        if !matches!(
            event,
            DocumentTransition::Start | DocumentTransition::Reprocess
        ) {
            return Err(AppError::InvalidTransition(format!(
                "{} does not enter PROCESSING",
                event.as_str()
            )));
        }

        let current = Self::get_by_id(id, db).await?;
        if current.status == DocumentStatus::Processing {
            return Err(AppError::ConcurrencyConflict(format!(
                "document {id} is already being processed"
            )));
        }
        compute_next_state(&current.status, event)?;

        let run_id = Uuid::new_v4().to_string();
        let allowed: Vec<&'static str> = event
            .allowed_from()
            .iter()
            .map(DocumentStatus::as_str)
            .collect();
        let now = chrono::Utc::now();

        let outcome = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("chunk_table", DocumentChunk::table_name()))
            .bind(("id", id.to_string()))
            .bind(("processing", DocumentStatus::Processing.as_str()))
            .bind(("allowed_states", allowed))
            .bind(("run_id", run_id.clone()))
            .bind(("now", SurrealDatetime::from(now)))
            .await
            .and_then(surrealdb::Response::check);

        if let Err(err) = outcome {
            if is_transaction_conflict(&err) {
                return Err(lost_run(id));
            }
            // A concurrent claim may surface as a different storage error.
            let current = Self::get_by_id(id, db).await?;
            if current.status == DocumentStatus::Processing
                && current.run_id.as_deref() != Some(run_id.as_str())
            {
                return Err(lost_run(id));
            }
            return Err(err.into());
        }

        let claimed = Self::get_by_id(id, db).await?;
        if claimed.status == DocumentStatus::Processing
            && claimed.run_id.as_deref() == Some(run_id.as_str())
        {
            tracing::debug!(run_id = %run_id, attempt = claimed.attempts, "claimed document");
            Ok(claimed)
        } else if claimed.status == DocumentStatus::Processing {
            Err(AppError::ConcurrencyConflict(format!(
                "document {id} is already being processed"
            )))
        } else {
            Err(invalid_transition(&claimed.status, event))
        }
    }

    /// Replaces the chunk set and marks the document `COMPLETED` in one transaction.
    ///
    /// Fails with `ConcurrencyConflict` when this run no longer owns the document; in that
    /// case nothing is written. Any other error leaves the document `PROCESSING` under this
    /// run, so the caller can still record a failure.
    pub async fn complete_with_chunks(
        &self,
        chunks: Vec<DocumentChunk>,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        compute_next_state(&self.status, DocumentTransition::Complete)?;
        let run_id = self
            .run_id
            .clone()
            .ok_or_else(|| invalid_transition(&self.status, DocumentTransition::Complete))?;

        if chunks.is_empty() {
            return Err(AppError::Chunking(
                "refusing to complete a document without chunks".to_string(),
            ));
        }
        let chunk_count = u32::try_from(chunks.len())
            .map_err(|_| AppError::Chunking("too many chunks".to_string()))?;

        let commit = || {
            let id = self.id.clone();
            let run_id = run_id.clone();
            let chunks = chunks.clone();
            async move {
                db.client
                    .query(commit_query())
                    .bind(("table", Self::table_name()))
                    .bind(("chunk_table", DocumentChunk::table_name()))
                    .bind(("id", id))
                    .bind(("completed_state", DocumentStatus::Completed.as_str()))
                    .bind(("processing", DocumentStatus::Processing.as_str()))
                    .bind(("run_id", run_id))
                    .bind(("chunk_count", chunk_count))
                    .bind(("chunks", chunks))
                    .bind(("now", SurrealDatetime::from(chrono::Utc::now())))
                    .await
                    .and_then(surrealdb::Response::check)
                    .map(|_| ())
            }
        };

        self.write_terminal(DocumentTransition::Complete, &run_id, db, commit, |doc| {
            doc.status == DocumentStatus::Completed && doc.chunk_count == chunk_count
        })
        .await
    }

    /// Marks the document `FAILED` with a diagnostic and drops any chunks.
    pub async fn mark_failed(
        &self,
        failure: &DocumentFailure,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        compute_next_state(&self.status, DocumentTransition::Fail)?;
        let run_id = self
            .run_id
            .clone()
            .ok_or_else(|| invalid_transition(&self.status, DocumentTransition::Fail))?;

        let fail = || {
            let id = self.id.clone();
            let run_id = run_id.clone();
            let failure = failure.clone();
            async move {
                db.client
                    .query(FAIL_QUERY)
                    .bind(("table", Self::table_name()))
                    .bind(("chunk_table", DocumentChunk::table_name()))
                    .bind(("id", id))
                    .bind(("failed_state", DocumentStatus::Failed.as_str()))
                    .bind(("processing", DocumentStatus::Processing.as_str()))
                    .bind(("run_id", run_id))
                    .bind(("error_code", failure.code))
                    .bind(("error_message", failure.message))
                    .bind(("now", SurrealDatetime::from(chrono::Utc::now())))
                    .await
                    .and_then(surrealdb::Response::check)
                    .map(|_| ())
            }
        };

        self.write_terminal(DocumentTransition::Fail, &run_id, db, fail, |doc| {
            doc.status == DocumentStatus::Failed
                && doc.error_message.as_deref() == Some(failure.message.as_str())
        })
        .await
    }

    /// Runs a guarded terminal write, retrying with backoff while this run still owns the
    /// document and the write lost a transaction race.
    async fn write_terminal<W, Fut>(
        &self,
        event: DocumentTransition,
        run_id: &str,
        db: &SurrealDbClient,
        write: W,
        landed: impl Fn(&Document) -> bool,
    ) -> Result<Document, AppError>
    where
        W: Fn() -> Fut,
        Fut: Future<Output = Result<(), surrealdb::Error>>,
    {
        let mut backoff_ms = TERMINAL_WRITE_INITIAL_BACKOFF_MS;
        let last_attempt = TERMINAL_WRITE_ATTEMPTS.saturating_sub(1);

        for attempt in 0..TERMINAL_WRITE_ATTEMPTS {
            let outcome = write().await;
            let stored = db.get_item::<Document>(&self.id).await?;

            match settle_terminal_write(outcome, stored, run_id, &landed) {
                TerminalWrite::Landed(doc) => return Ok(doc),
                TerminalWrite::Lost => return Err(lost_run(&self.id)),
                TerminalWrite::Owned(err) => {
                    let retryable = err.as_ref().map_or(true, is_transaction_conflict);
                    if retryable && attempt < last_attempt {
                        warn!(
                            document_id = %self.id,
                            transition = event.as_str(),
                            attempt = attempt.saturating_add(1),
                            "terminal document write did not apply; retrying"
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = backoff_ms
                            .saturating_mul(2)
                            .min(TERMINAL_WRITE_MAX_BACKOFF_MS);
                        continue;
                    }

                    return Err(err.map_or_else(
                        || {
                            AppError::InternalError(format!(
                                "{} write for document {} did not apply",
                                event.as_str(),
                                self.id
                            ))
                        },
                        AppError::from,
                    ));
                }
            }
        }

        Err(AppError::InternalError(format!(
            "{} write for document {} failed after retries",
            event.as_str(),
            self.id
        )))
    }

    /// Deletes the document together with all of its chunks. Returns the removed record.
    pub async fn delete_with_chunks(
        id: &str,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let existing = Self::get_by_id(id, db).await?;

        db.client
            .query(DELETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("chunk_table", DocumentChunk::table_name()))
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(existing)
    }

    /// Documents that entered `PROCESSING` before `started_before` and never left it.
    pub async fn list_stale_processing(
        started_before: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Document>, AppError> {
        let documents: Vec<Document> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE status = $processing AND processing_started_at < $cutoff
                 ORDER BY processing_started_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("processing", DocumentStatus::Processing.as_str()))
            .bind(("cutoff", SurrealDatetime::from(started_before)))
            .await?
            .take(0)?;

        Ok(documents)
    }
}
